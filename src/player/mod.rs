pub mod simulated;
pub mod traits;

pub use simulated::{
    BackendCall, SimulatedBackend, SimulatedBackendFactory, SimulatedBehavior, SimulatedProbe,
};
pub use traits::{BackendEvent, BackendEventSink, BackendFactory, BackendResult, MediaBackend};
