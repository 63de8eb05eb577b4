use serde::{Deserialize, Serialize};

use crate::models::{ApplicationState, SessionId, SurfaceId};
use crate::utils::ErrorKind;

/// Envelope published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub sequence: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: PlaybackEvent,
}

impl EngineEvent {
    pub fn new(sequence: u64, payload: PlaybackEvent) -> Self {
        Self {
            sequence,
            timestamp: chrono::Utc::now(),
            payload,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

/// Outbound notifications for UI and persistence collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlaybackEvent {
    PositionChanged {
        session_id: SessionId,
        position_ms: u64,
    },
    DurationChanged {
        session_id: SessionId,
        duration_ms: u64,
    },
    StateChanged {
        session_id: SessionId,
        state: ApplicationState,
    },
    EndReached {
        session_id: SessionId,
    },
    Error {
        session_id: SessionId,
        kind: ErrorKind,
        message: String,
    },
    /// The session's backend has been fully released.
    SessionReleased {
        session_id: SessionId,
    },
    /// The surface's backing resource may now be destroyed.
    SurfaceReleased {
        surface_id: SurfaceId,
        /// Session that last rendered into it. Not a producer of the event,
        /// so session filters ignore it.
        owner: Option<SessionId>,
    },
}

impl PlaybackEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            PlaybackEvent::PositionChanged { .. } => EventType::PositionChanged,
            PlaybackEvent::DurationChanged { .. } => EventType::DurationChanged,
            PlaybackEvent::StateChanged { .. } => EventType::StateChanged,
            PlaybackEvent::EndReached { .. } => EventType::EndReached,
            PlaybackEvent::Error { .. } => EventType::Error,
            PlaybackEvent::SessionReleased { .. } => EventType::SessionReleased,
            PlaybackEvent::SurfaceReleased { .. } => EventType::SurfaceReleased,
        }
    }

    /// The session that produced the event. Surface events carry none.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            PlaybackEvent::PositionChanged { session_id, .. }
            | PlaybackEvent::DurationChanged { session_id, .. }
            | PlaybackEvent::StateChanged { session_id, .. }
            | PlaybackEvent::EndReached { session_id }
            | PlaybackEvent::Error { session_id, .. }
            | PlaybackEvent::SessionReleased { session_id } => Some(*session_id),
            PlaybackEvent::SurfaceReleased { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    PositionChanged,
    DurationChanged,
    StateChanged,
    EndReached,
    Error,
    SessionReleased,
    SurfaceReleased,
}

impl EventType {
    /// Get a string representation for filtering/routing
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PositionChanged => "playback.position_changed",
            EventType::DurationChanged => "playback.duration_changed",
            EventType::StateChanged => "playback.state_changed",
            EventType::EndReached => "playback.end_reached",
            EventType::Error => "playback.error",
            EventType::SessionReleased => "session.released",
            EventType::SurfaceReleased => "surface.released",
        }
    }
}
