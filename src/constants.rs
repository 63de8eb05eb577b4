// Engine tuning constants. Config defaults live here so they can be shared
// with the demo binary and tests.

// === Resume ===
pub const DEFAULT_RESUME_THRESHOLD_MS: u64 = 5_000;
pub const DEFAULT_COMPLETION_RATIO: f64 = 0.9;

// === Teardown ===
// Retiring longer than this is reported as TeardownTimeout (advisory only)
pub const DEFAULT_TEARDOWN_TIMEOUT_MS: u64 = 5_000;

// === Event bus ===
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
pub const DEFAULT_EVENT_HISTORY: usize = 100;

// === Simulated backend ===
pub const SIMULATED_TICK_MS: u64 = 20;
pub const SIMULATED_DEFAULT_DURATION_MS: u64 = 60_000;
