use serde::Serialize;
use tracing::debug;

use crate::config::EndOfMediaPolicy;
use crate::events::PlaybackEvent;
use crate::models::{ApplicationState, MediaLocator, ReadyHandle, SessionId, SessionSnapshot};
use crate::utils::ErrorKind;

/// What the outside world sees of playback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackStatus {
    pub state: ApplicationState,
    pub session_id: Option<SessionId>,
    pub source: Option<MediaLocator>,
    pub position_ms: u64,
    pub duration_ms: u64,
}

impl PlaybackStatus {
    /// Take over a freshly switched-to session. Also clears a previous
    /// `Error` state.
    pub fn adopt(&mut self, source: MediaLocator, ready: &ReadyHandle) {
        debug!(session = %ready.session_id, %source, "Controller following new session");
        self.state = ApplicationState::Paused;
        self.session_id = Some(ready.session_id);
        self.source = Some(source);
        self.position_ms = ready.position_ms;
        self.duration_ms = ready.duration_ms;
    }

    /// Whether `event` belongs to the session this status follows.
    pub fn follows(&self, event: &PlaybackEvent) -> bool {
        self.session_id.is_some() && event.session_id() == self.session_id
    }

    /// Overwrite position and state with what the worker itself reports,
    /// after events were lost. Snapshots of other sessions are ignored.
    pub fn resync(&mut self, snapshot: &SessionSnapshot) {
        if self.session_id != Some(snapshot.id) {
            return;
        }

        self.position_ms = snapshot.position_ms;
        self.duration_ms = snapshot.duration_ms;
        if snapshot.ended {
            self.state = ApplicationState::Ended;
        } else if let Some(state) = snapshot.state.to_application_state() {
            self.state = state;
        }
    }

    /// Fold one event of the followed session into the status.
    pub fn apply(&mut self, event: &PlaybackEvent, policy: EndOfMediaPolicy) {
        match event {
            PlaybackEvent::PositionChanged { position_ms, .. } => {
                self.position_ms = *position_ms;
            }
            PlaybackEvent::DurationChanged { duration_ms, .. } => {
                self.duration_ms = *duration_ms;
            }
            PlaybackEvent::StateChanged { state, .. } => {
                self.state = *state;
            }
            PlaybackEvent::EndReached { .. } => {
                // A restarting session reports its own landing state.
                if !policy.restarts() {
                    self.state = ApplicationState::Ended;
                    self.position_ms = self.duration_ms;
                }
            }
            PlaybackEvent::Error { kind, .. } => {
                if *kind != ErrorKind::TeardownTimeout {
                    self.state = ApplicationState::Error;
                }
            }
            PlaybackEvent::SessionReleased { .. } | PlaybackEvent::SurfaceReleased { .. } => {}
        }
    }
}
