use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{MediaLocator, NativeHandle, SessionId, SurfaceId};

/// Failures reported by a native media backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Media not found: {0}")]
    NotFound(String),

    #[error("Unsupported media: {0}")]
    Unsupported(String),

    #[error("No render surface attached")]
    NoSurface,

    #[error("Backend refused to seek from {0} state")]
    NotSeekable(&'static str),

    #[error("Operation not valid in {0} state")]
    InvalidState(&'static str),

    #[error("Backend fault: {0}")]
    Fault(String),
}

/// Failures of the render surface layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("Platform failed to allocate a render target: {0}")]
    AllocationFailed(String),

    #[error("Native handle {0} is still owned by a live surface")]
    HandleInUse(NativeHandle),

    #[error("Unknown surface {0}")]
    UnknownSurface(SurfaceId),

    #[error("Surface {surface} is {state}, expected {expected}")]
    InvalidTransition {
        surface: SurfaceId,
        state: &'static str,
        expected: &'static str,
    },

    #[error("Surface {surface} is owned by {owner:?}, release confirmed by {claimed}")]
    NotOwner {
        surface: SurfaceId,
        owner: Option<SessionId>,
        claimed: SessionId,
    },
}

/// Why a load or switch did not produce a ready session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Media not found: {0}")]
    NotFound(MediaLocator),

    #[error("Unsupported media {locator}: {reason}")]
    Unsupported { locator: MediaLocator, reason: String },

    #[error("Render surface unavailable: {0}")]
    SurfaceUnavailable(#[from] SurfaceError),

    #[error("Backend failed to load {locator}: {error}")]
    Backend {
        locator: MediaLocator,
        error: BackendError,
    },

    #[error("Switch to {0} was superseded by a newer switch")]
    Superseded(MediaLocator),

    #[error("Session worker exited before reporting readiness")]
    WorkerGone,
}

impl LoadError {
    pub(crate) fn from_backend(source: &MediaLocator, error: BackendError) -> Self {
        match error {
            BackendError::NotFound(_) => LoadError::NotFound(source.clone()),
            BackendError::Unsupported(reason) => LoadError::Unsupported {
                locator: source.clone(),
                reason,
            },
            error => LoadError::Backend {
                locator: source.clone(),
                error,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::SurfaceUnavailable(_) => ErrorKind::SurfaceUnavailable,
            _ => ErrorKind::LoadError,
        }
    }
}

/// Top-level error for controller and supervisor calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Backend fault in {session}: {error}")]
    Backend {
        session: SessionId,
        error: BackendError,
    },

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error("No active session")]
    NoActiveSession,

    #[error("Session {0} is no longer accepting commands")]
    SessionGone(SessionId),

    #[error("Engine has been shut down")]
    ShutDown,
}

/// Classification carried by `Error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    LoadError,
    BackendFault,
    SurfaceUnavailable,
    /// Advisory only; retirement never blocks the caller.
    TeardownTimeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LoadError => "load_error",
            ErrorKind::BackendFault => "backend_fault",
            ErrorKind::SurfaceUnavailable => "surface_unavailable",
            ErrorKind::TeardownTimeout => "teardown_timeout",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
