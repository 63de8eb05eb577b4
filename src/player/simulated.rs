//! In-process stand-in for a native media engine.
//!
//! Models the behaviour the session engine has to cope with on real hardware:
//! blocking load/stop/release calls, a clock thread raising position and
//! end-of-media notifications, refusal to seek from an ended or stopped state,
//! and losing the render surface binding on `stop()`.
//!
//! Locator prefixes select failure modes: `missing:` fails with not-found,
//! `unsupported:` with unsupported media, `broken:` loads fine but faults
//! shortly after playback starts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::traits::{BackendEvent, BackendEventSink, BackendFactory, BackendResult, MediaBackend};
use crate::constants::{SIMULATED_DEFAULT_DURATION_MS, SIMULATED_TICK_MS};
use crate::models::{MediaLocator, NativeHandle};
use crate::utils::BackendError;

const BROKEN_FAULT_AT_MS: u64 = 40;

/// Every call made on a simulated backend, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    SetSurface(Option<NativeHandle>),
    Load(MediaLocator),
    Play,
    Pause,
    Seek(u64),
    Stop,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Ready,
    Playing,
    Paused,
    Ended,
    Stopped,
    Faulted,
    Released,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Ready => "ready",
            Phase::Playing => "playing",
            Phase::Paused => "paused",
            Phase::Ended => "ended",
            Phase::Stopped => "stopped",
            Phase::Faulted => "faulted",
            Phase::Released => "released",
        }
    }
}

/// Timing and media knobs for simulated backends.
#[derive(Debug, Clone)]
pub struct SimulatedBehavior {
    pub load_delay: Duration,
    pub stop_delay: Duration,
    pub release_delay: Duration,
    pub tick: Duration,
    pub default_duration_ms: u64,
    durations: HashMap<String, u64>,
    stop_delays: HashMap<String, Duration>,
    load_delays: HashMap<String, Duration>,
}

impl Default for SimulatedBehavior {
    fn default() -> Self {
        Self {
            load_delay: Duration::ZERO,
            stop_delay: Duration::ZERO,
            release_delay: Duration::ZERO,
            tick: Duration::from_millis(SIMULATED_TICK_MS),
            default_duration_ms: SIMULATED_DEFAULT_DURATION_MS,
            durations: HashMap::new(),
            stop_delays: HashMap::new(),
            load_delays: HashMap::new(),
        }
    }
}

impl SimulatedBehavior {
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_default_duration(mut self, duration_ms: u64) -> Self {
        self.default_duration_ms = duration_ms;
        self
    }

    pub fn with_duration(mut self, source: impl Into<String>, duration_ms: u64) -> Self {
        self.durations.insert(source.into(), duration_ms);
        self
    }

    /// Stall `stop()` for one particular source only.
    pub fn with_stop_delay_for(mut self, source: impl Into<String>, delay: Duration) -> Self {
        self.stop_delays.insert(source.into(), delay);
        self
    }

    /// Stall `load()` for one particular source only.
    pub fn with_load_delay_for(mut self, source: impl Into<String>, delay: Duration) -> Self {
        self.load_delays.insert(source.into(), delay);
        self
    }

    fn load_delay_for(&self, source: &MediaLocator) -> Duration {
        self.load_delays
            .get(source.as_str())
            .copied()
            .unwrap_or(self.load_delay)
    }

    fn duration_for(&self, source: &MediaLocator) -> u64 {
        self.durations
            .get(source.as_str())
            .copied()
            .unwrap_or(self.default_duration_ms)
    }

    fn stop_delay_for(&self, source: Option<&MediaLocator>) -> Duration {
        source
            .and_then(|s| self.stop_delays.get(s.as_str()).copied())
            .unwrap_or(self.stop_delay)
    }
}

#[derive(Debug)]
struct Playhead {
    phase: Phase,
    position_ms: u64,
    started: Option<Instant>,
    duration_ms: u64,
    fault_at_ms: Option<u64>,
}

impl Playhead {
    fn current_position(&self) -> u64 {
        match (self.phase, self.started) {
            (Phase::Playing, Some(started)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                (self.position_ms + elapsed).min(self.duration_ms)
            }
            _ => self.position_ms,
        }
    }

    fn freeze(&mut self) {
        self.position_ms = self.current_position();
        self.started = None;
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    calls: Vec<BackendCall>,
    surface: Option<NativeHandle>,
    released: bool,
    source: Option<MediaLocator>,
}

/// Test-side view of one simulated backend instance.
#[derive(Debug, Clone)]
pub struct SimulatedProbe {
    index: usize,
    state: Arc<Mutex<ProbeState>>,
    playhead: Arc<Mutex<Playhead>>,
}

impl SimulatedProbe {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.state).calls.clone()
    }

    pub fn surface(&self) -> Option<NativeHandle> {
        lock(&self.state).surface
    }

    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }

    pub fn source(&self) -> Option<MediaLocator> {
        lock(&self.state).source.clone()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.playhead).phase
    }

    pub fn position_ms(&self) -> u64 {
        lock(&self.playhead).current_position()
    }

    /// Jump the clock, as if playback had run until `position_ms`.
    pub fn advance_to(&self, position_ms: u64) {
        let mut playhead = lock(&self.playhead);
        playhead.position_ms = position_ms.min(playhead.duration_ms);
        if playhead.started.is_some() {
            playhead.started = Some(Instant::now());
        }
    }
}

/// Tracks which backend renders into which native handle, across all
/// backends of one factory.
#[derive(Debug, Default)]
struct SurfaceLedger {
    owners: HashMap<NativeHandle, usize>,
    violations: Vec<String>,
}

impl SurfaceLedger {
    fn bind(&mut self, backend: usize, handle: Option<NativeHandle>) {
        self.owners.retain(|_, owner| *owner != backend);
        if let Some(handle) = handle {
            if let Some(other) = self.owners.get(&handle) {
                self.violations.push(format!(
                    "backend {} bound {} while backend {} still renders into it",
                    backend, handle, other
                ));
            }
            self.owners.insert(handle, backend);
        }
    }
}

/// Factory producing [`SimulatedBackend`]s and keeping a probe for each one.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackendFactory {
    behavior: SimulatedBehavior,
    probes: Arc<Mutex<Vec<SimulatedProbe>>>,
    ledger: Arc<Mutex<SurfaceLedger>>,
    created: Arc<AtomicUsize>,
}

impl SimulatedBackendFactory {
    pub fn new(behavior: SimulatedBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    pub fn probes(&self) -> Vec<SimulatedProbe> {
        lock(&self.probes).clone()
    }

    /// Probe of the most recent backend that loaded `source`.
    pub fn probe_for(&self, source: &str) -> Option<SimulatedProbe> {
        self.probes()
            .into_iter()
            .rev()
            .find(|probe| probe.source().is_some_and(|s| s.as_str() == source))
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Every time two live backends were bound to the same native handle.
    pub fn surface_violations(&self) -> Vec<String> {
        lock(&self.ledger).violations.clone()
    }
}

impl BackendFactory for SimulatedBackendFactory {
    fn create(&self, events: BackendEventSink) -> BackendResult<Box<dyn MediaBackend>> {
        let index = self.created.fetch_add(1, Ordering::SeqCst);
        let backend = SimulatedBackend::new(index, self.behavior.clone(), events, self.ledger.clone());
        lock(&self.probes).push(backend.probe());
        Ok(Box::new(backend))
    }
}

pub struct SimulatedBackend {
    index: usize,
    behavior: SimulatedBehavior,
    events: BackendEventSink,
    probe: Arc<Mutex<ProbeState>>,
    playhead: Arc<Mutex<Playhead>>,
    ledger: Arc<Mutex<SurfaceLedger>>,
    shutdown: Arc<AtomicBool>,
    clock: Option<JoinHandle<()>>,
}

impl SimulatedBackend {
    fn new(
        index: usize,
        behavior: SimulatedBehavior,
        events: BackendEventSink,
        ledger: Arc<Mutex<SurfaceLedger>>,
    ) -> Self {
        Self {
            index,
            behavior,
            events,
            probe: Arc::new(Mutex::new(ProbeState::default())),
            playhead: Arc::new(Mutex::new(Playhead {
                phase: Phase::Idle,
                position_ms: 0,
                started: None,
                duration_ms: 0,
                fault_at_ms: None,
            })),
            ledger,
            shutdown: Arc::new(AtomicBool::new(false)),
            clock: None,
        }
    }

    fn probe(&self) -> SimulatedProbe {
        SimulatedProbe {
            index: self.index,
            state: self.probe.clone(),
            playhead: self.playhead.clone(),
        }
    }

    fn record(&self, call: BackendCall) {
        trace!(backend = self.index, ?call, "Simulated backend call");
        lock(&self.probe).calls.push(call);
    }

    fn bind_surface(&self, surface: Option<NativeHandle>) {
        lock(&self.probe).surface = surface;
        lock(&self.ledger).bind(self.index, surface);
    }

    fn start_clock(&mut self) {
        if self.clock.is_some() {
            return;
        }

        let playhead = self.playhead.clone();
        let shutdown = self.shutdown.clone();
        let events = self.events.clone();
        let tick = self.behavior.tick;
        let spawned = thread::Builder::new()
            .name(format!("sim-clock-{}", self.index))
            .spawn(move || run_clock(playhead, shutdown, events, tick));

        match spawned {
            Ok(handle) => self.clock = Some(handle),
            Err(err) => warn!("Failed to start simulated clock: {}", err),
        }
    }

    fn stop_clock(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.clock.take()
            && handle.join().is_err()
        {
            warn!(backend = self.index, "Simulated clock thread panicked");
        }
    }
}

fn run_clock(
    playhead: Arc<Mutex<Playhead>>,
    shutdown: Arc<AtomicBool>,
    events: BackendEventSink,
    tick: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(tick);

        let mut pending = Vec::new();
        {
            let mut head = lock(&playhead);
            if head.phase != Phase::Playing {
                continue;
            }

            let position = head.current_position();
            if head.fault_at_ms.is_some_and(|at| position >= at) {
                head.freeze();
                head.phase = Phase::Faulted;
                pending.push(BackendEvent::Fault("decoder lost sync".to_string()));
            } else if position >= head.duration_ms {
                head.freeze();
                head.phase = Phase::Ended;
                pending.push(BackendEvent::Position(head.duration_ms));
                pending.push(BackendEvent::EndReached);
            } else {
                pending.push(BackendEvent::Position(position));
            }
        }

        for event in pending {
            events.emit(event);
        }
    }
}

impl MediaBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn set_surface(&mut self, surface: Option<NativeHandle>) -> BackendResult<()> {
        self.record(BackendCall::SetSurface(surface));
        let phase = lock(&self.playhead).phase;
        if phase == Phase::Released {
            return Err(BackendError::InvalidState(phase.as_str()));
        }
        self.bind_surface(surface);
        Ok(())
    }

    fn load(&mut self, source: &MediaLocator) -> BackendResult<u64> {
        self.record(BackendCall::Load(source.clone()));
        lock(&self.probe).source = Some(source.clone());
        let delay = self.behavior.load_delay_for(source);
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let locator = source.as_str();
        if locator.starts_with("missing:") {
            return Err(BackendError::NotFound(locator.to_string()));
        }
        if locator.starts_with("unsupported:") {
            return Err(BackendError::Unsupported(format!("no demuxer for {}", locator)));
        }

        let duration_ms = self.behavior.duration_for(source);
        {
            let mut head = lock(&self.playhead);
            head.phase = Phase::Ready;
            head.position_ms = 0;
            head.started = None;
            head.duration_ms = duration_ms;
            head.fault_at_ms = locator.starts_with("broken:").then_some(BROKEN_FAULT_AT_MS);
        }
        self.start_clock();
        debug!(backend = self.index, %source, duration_ms, "Simulated media loaded");
        Ok(duration_ms)
    }

    fn play(&mut self) -> BackendResult<()> {
        self.record(BackendCall::Play);
        if lock(&self.probe).surface.is_none() {
            return Err(BackendError::NoSurface);
        }

        let mut head = lock(&self.playhead);
        match head.phase {
            Phase::Ready | Phase::Paused => {}
            Phase::Playing => return Ok(()),
            Phase::Stopped => head.position_ms = 0,
            phase => return Err(BackendError::InvalidState(phase.as_str())),
        }
        head.phase = Phase::Playing;
        head.started = Some(Instant::now());
        Ok(())
    }

    fn pause(&mut self) -> BackendResult<()> {
        self.record(BackendCall::Pause);
        let mut head = lock(&self.playhead);
        match head.phase {
            Phase::Playing => {
                head.freeze();
                head.phase = Phase::Paused;
                Ok(())
            }
            Phase::Ready | Phase::Paused => Ok(()),
            phase => Err(BackendError::InvalidState(phase.as_str())),
        }
    }

    fn seek(&mut self, position_ms: u64) -> BackendResult<()> {
        self.record(BackendCall::Seek(position_ms));
        let mut head = lock(&self.playhead);
        match head.phase {
            Phase::Ended | Phase::Stopped => Err(BackendError::NotSeekable(head.phase.as_str())),
            Phase::Ready | Phase::Paused | Phase::Playing => {
                head.position_ms = position_ms.min(head.duration_ms);
                if head.phase == Phase::Playing {
                    head.started = Some(Instant::now());
                }
                Ok(())
            }
            phase => Err(BackendError::InvalidState(phase.as_str())),
        }
    }

    fn stop(&mut self) -> BackendResult<()> {
        self.record(BackendCall::Stop);
        let source = lock(&self.probe).source.clone();
        let delay = self.behavior.stop_delay_for(source.as_ref());
        if !delay.is_zero() {
            debug!(backend = self.index, ?delay, "Simulated stop stalling");
            thread::sleep(delay);
        }

        {
            let mut head = lock(&self.playhead);
            if head.phase == Phase::Released {
                return Err(BackendError::InvalidState(head.phase.as_str()));
            }
            head.freeze();
            head.phase = Phase::Stopped;
        }
        // Hardware surface binding does not survive a stop.
        self.bind_surface(None);
        Ok(())
    }

    fn release(&mut self) -> BackendResult<()> {
        self.record(BackendCall::Release);
        if !self.behavior.release_delay.is_zero() {
            thread::sleep(self.behavior.release_delay);
        }
        self.stop_clock();
        lock(&self.playhead).phase = Phase::Released;
        self.bind_surface(None);
        lock(&self.probe).released = true;
        Ok(())
    }

    fn position_ms(&self) -> u64 {
        lock(&self.playhead).current_position()
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        self.stop_clock();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
