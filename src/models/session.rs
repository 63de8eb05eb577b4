use serde::{Deserialize, Serialize};

use super::{MediaLocator, SessionId, SurfaceId};

/// Internal lifecycle of a session, owned by its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Loading,
    Ready,
    Playing,
    Paused,
    Stopping,
    Released,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Loading => "loading",
            SessionState::Ready => "ready",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
            SessionState::Released => "released",
            SessionState::Error => "error",
        }
    }

    /// The externally visible state this maps to, if any.
    ///
    /// `Loading`, `Stopping` and `Released` never surface; the product has no
    /// stop affordance.
    pub fn to_application_state(self) -> Option<ApplicationState> {
        match self {
            SessionState::Ready | SessionState::Paused => Some(ApplicationState::Paused),
            SessionState::Playing => Some(ApplicationState::Playing),
            SessionState::Error => Some(ApplicationState::Error),
            SessionState::Loading | SessionState::Stopping | SessionState::Released => None,
        }
    }

    pub fn is_released(&self) -> bool {
        matches!(self, SessionState::Released)
    }
}

/// Externally observable playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApplicationState {
    Playing,
    #[default]
    Paused,
    Ended,
    Error,
}

impl ApplicationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationState::Playing => "playing",
            ApplicationState::Paused => "paused",
            ApplicationState::Ended => "ended",
            ApplicationState::Error => "error",
        }
    }
}

/// Read-only copy of a session's state, published by its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    pub media_source: MediaLocator,
    pub surface_id: Option<SurfaceId>,
    pub position_ms: u64,
    pub duration_ms: u64,
    /// Sitting on the last frame after end of media.
    #[serde(default)]
    pub ended: bool,
}

impl SessionSnapshot {
    pub fn new(id: SessionId, media_source: MediaLocator, surface_id: Option<SurfaceId>) -> Self {
        Self {
            id,
            state: SessionState::Loading,
            media_source,
            surface_id,
            position_ms: 0,
            duration_ms: 0,
            ended: false,
        }
    }
}

/// What a session reports once its backend has reached `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyHandle {
    pub session_id: SessionId,
    pub surface_id: SurfaceId,
    pub duration_ms: u64,
    /// Position after any resume seek was applied.
    pub position_ms: u64,
}

/// User-issued commands consumed by the playback controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackIntent {
    Load(MediaLocator),
    Play,
    Pause,
    Seek(u64),
    Stop,
    NavigateNext,
    NavigatePrevious,
}

impl PlaybackIntent {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackIntent::Load(_) => "load",
            PlaybackIntent::Play => "play",
            PlaybackIntent::Pause => "pause",
            PlaybackIntent::Seek(_) => "seek",
            PlaybackIntent::Stop => "stop",
            PlaybackIntent::NavigateNext => "next",
            PlaybackIntent::NavigatePrevious => "previous",
        }
    }
}
