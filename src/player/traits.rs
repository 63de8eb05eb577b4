use std::fmt;
use std::sync::Arc;

use crate::models::{MediaLocator, NativeHandle};
use crate::utils::BackendError;

pub type BackendResult<T> = Result<T, BackendError>;

/// Notifications a backend raises from its own threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Position(u64),
    Duration(u64),
    EndReached,
    Fault(String),
}

/// Callback through which a backend reports [`BackendEvent`]s to its worker.
#[derive(Clone)]
pub struct BackendEventSink {
    emit: Arc<dyn Fn(BackendEvent) + Send + Sync>,
}

impl BackendEventSink {
    pub fn new(emit: impl Fn(BackendEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, event: BackendEvent) {
        (self.emit)(event)
    }
}

impl fmt::Debug for BackendEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendEventSink").finish_non_exhaustive()
    }
}

/// One native media engine instance.
///
/// Every method may block (codec setup, driver release). Calls only ever
/// happen on the owning session worker's thread.
pub trait MediaBackend: Send {
    fn name(&self) -> &'static str;

    /// Point the backend at a render target, or detach it with `None`.
    fn set_surface(&mut self, surface: Option<NativeHandle>) -> BackendResult<()>;

    /// Open the media and block until it is ready; returns its duration in ms.
    fn load(&mut self, source: &MediaLocator) -> BackendResult<u64>;

    fn play(&mut self) -> BackendResult<()>;
    fn pause(&mut self) -> BackendResult<()>;
    fn seek(&mut self, position_ms: u64) -> BackendResult<()>;
    fn stop(&mut self) -> BackendResult<()>;

    /// Free all native resources. The backend is unusable afterwards.
    fn release(&mut self) -> BackendResult<()>;

    fn position_ms(&self) -> u64;
}

/// Creates a fresh backend instance per session.
pub trait BackendFactory: Send + Sync {
    fn create(&self, events: BackendEventSink) -> BackendResult<Box<dyn MediaBackend>>;
}
