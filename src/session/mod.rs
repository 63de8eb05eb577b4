//! One backend instance per session, driven from its own thread.

mod handle;
mod restart;
mod worker;

pub use handle::SessionHandle;
pub use worker::{SessionContext, SessionWorker};

use crate::models::{SessionId, SessionState};
use crate::surface::ReleasedEvent;
use crate::utils::ErrorKind;

/// Something a session worker wants the rest of the engine to know.
///
/// Each worker is the only producer for its own id, so events for one
/// session arrive in the order it produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    PositionChanged(u64),
    DurationChanged(u64),
    StateChanged(SessionState),
    EndReached,
    Error { kind: ErrorKind, message: String },
    /// The worker finished native teardown and is about to exit.
    Released,
    SurfaceReleased(ReleasedEvent),
}

impl SessionEvent {
    pub fn new(session_id: SessionId, kind: SessionEventKind) -> Self {
        Self { session_id, kind }
    }
}
