//! Public playback façade: user intents in, application state out.

mod status;

pub use status::PlaybackStatus;

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{EngineConfig, PlaybackConfig};
use crate::events::{EventSubscriber, PlaybackEvent, Received};
use crate::models::{ApplicationState, MediaLocator, PlaybackIntent, ReadyHandle, SessionId, SurfaceId};
use crate::services::MediaSequencer;
use crate::session::SessionHandle;
use crate::supervisor::SessionSupervisor;
use crate::utils::{EngineError, EngineResult, LoadError};

/// Bookkeeping for the newest switch. Seeks are only held back while that
/// switch is unresolved; older switches never touch the buffer.
#[derive(Debug, Default)]
struct LoadTracker {
    latest: u64,
    latest_loading: bool,
    pending_seek: Option<u64>,
}

/// What to do with a buffered seek once the newest switch resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeekReplay {
    Nothing,
    OnLoaded(u64),
    OnActive(u64),
}

pub struct PlaybackController {
    supervisor: Arc<SessionSupervisor>,
    sequencer: Arc<dyn MediaSequencer>,
    playback: PlaybackConfig,
    status: Arc<RwLock<PlaybackStatus>>,
    loads: Mutex<LoadTracker>,
    cancel: CancellationToken,
}

impl PlaybackController {
    /// Create the controller and start following the supervisor's events.
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &EngineConfig,
        supervisor: Arc<SessionSupervisor>,
        sequencer: Arc<dyn MediaSequencer>,
    ) -> Arc<Self> {
        let events = supervisor.bus().subscribe();
        let controller = Arc::new(Self {
            supervisor,
            sequencer,
            playback: config.playback.clone(),
            status: Arc::new(RwLock::new(PlaybackStatus::default())),
            loads: Mutex::new(LoadTracker::default()),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(pump_events(
            Arc::downgrade(&controller),
            controller.status.clone(),
            events,
            controller.playback.clone(),
            controller.cancel.clone(),
        ));

        controller
    }

    /// Apply one user intent.
    pub async fn submit(&self, intent: PlaybackIntent) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        trace!(intent = intent.name(), "Intent submitted");

        match intent {
            PlaybackIntent::Load(source) => self.load(source).await.map(|_| ()),
            PlaybackIntent::Play => self.active()?.play().await,
            PlaybackIntent::Pause => self.active()?.pause().await,
            PlaybackIntent::Seek(position_ms) => self.seek(position_ms).await,
            // There is no stop affordance; stopping means holding still.
            PlaybackIntent::Stop => self.active()?.pause().await,
            PlaybackIntent::NavigateNext => self.navigate(true).await,
            PlaybackIntent::NavigatePrevious => self.navigate(false).await,
        }
    }

    /// Switch to `source`. Resolves once the new session is active.
    pub async fn load(&self, source: MediaLocator) -> EngineResult<ReadyHandle> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::ShutDown);
        }

        let ticket = {
            let mut loads = self.loads();
            loads.latest += 1;
            loads.latest_loading = true;
            loads.latest
        };

        let result = self.supervisor.switch_to(source.clone()).await;

        let (is_latest, replay) = {
            let mut loads = self.loads();
            let is_latest = loads.latest == ticket;
            if is_latest {
                loads.latest_loading = false;
            }
            let pending_seek = if is_latest { loads.pending_seek.take() } else { None };
            (is_latest, seek_replay(pending_seek, &result))
        };

        // Superseded by a switch that already won; the seek goes to it.
        if let SeekReplay::OnActive(position_ms) = replay
            && let Some(handle) = self.supervisor.active()
        {
            debug!(session = %handle.id(), position_ms, "Handing buffered seek to the active session");
            if let Err(err) = handle.seek(position_ms).await {
                warn!(position_ms, "Buffered seek failed: {}", err);
            }
        }

        let ready = result?;

        // Adopt under the status lock, and only while still active, so an
        // overlapping switch that lost the race cannot take over the status.
        let adopted = {
            let mut status = self.status_mut();
            let still_active = self.supervisor.active_session_id() == Some(ready.session_id);
            if still_active {
                status.adopt(source.clone(), &ready);
            }
            still_active
        };
        if !adopted {
            debug!(session = %ready.session_id, %source, "Switch replaced before it was adopted");
            return Ok(ready);
        }
        info!(session = %ready.session_id, %source, "Now playing");

        // The session may already have been replaced by a faster switch.
        let Some(handle) = self
            .supervisor
            .active()
            .filter(|handle| handle.id() == ready.session_id)
        else {
            return Ok(ready);
        };

        if let SeekReplay::OnLoaded(position_ms) = replay {
            debug!(session = %ready.session_id, position_ms, "Replaying buffered seek");
            handle.seek(position_ms).await?;
        }
        if self.playback.autoplay && is_latest {
            handle.play().await?;
        }
        Ok(ready)
    }

    async fn seek(&self, position_ms: u64) -> EngineResult<()> {
        {
            let mut loads = self.loads();
            if loads.latest_loading {
                debug!(position_ms, "Buffering seek until the new session is ready");
                loads.pending_seek = Some(position_ms);
                return Ok(());
            }
        }
        self.active()?.seek(position_ms).await
    }

    async fn navigate(&self, forward: bool) -> EngineResult<()> {
        let current = self
            .status()
            .source
            .clone()
            .ok_or(EngineError::NoActiveSession)?;

        let target = if forward {
            self.sequencer.next(&current).await
        } else {
            self.sequencer.previous(&current).await
        };

        match target {
            Some(source) => self.load(source).await.map(|_| ()),
            None => {
                debug!(%current, forward, "Nothing to navigate to");
                Ok(())
            }
        }
    }

    /// Move the active session onto a new surface (e.g. entering full screen).
    pub async fn migrate_surface(&self) -> EngineResult<SurfaceId> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        self.supervisor.migrate_surface().await
    }

    /// Retire the active session and stop following events.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!("Playback controller shutting down");
        self.cancel.cancel();
        self.supervisor.shutdown();
    }

    pub fn state(&self) -> ApplicationState {
        self.status().state
    }

    pub fn position_ms(&self) -> u64 {
        self.status().position_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.status().duration_ms
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.status().session_id
    }

    pub fn snapshot(&self) -> PlaybackStatus {
        self.status().clone()
    }

    pub fn supervisor(&self) -> &Arc<SessionSupervisor> {
        &self.supervisor
    }

    fn active(&self) -> EngineResult<SessionHandle> {
        self.supervisor.active().ok_or(EngineError::NoActiveSession)
    }

    fn status(&self) -> RwLockReadGuard<'_, PlaybackStatus> {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status_mut(&self) -> RwLockWriteGuard<'_, PlaybackStatus> {
        write_status(&self.status)
    }

    fn loads(&self) -> MutexGuard<'_, LoadTracker> {
        self.loads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn write_status(status: &RwLock<PlaybackStatus>) -> RwLockWriteGuard<'_, PlaybackStatus> {
    status
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Decide where a seek buffered during the newest switch ends up.
fn seek_replay(pending_seek: Option<u64>, result: &Result<ReadyHandle, LoadError>) -> SeekReplay {
    let Some(position_ms) = pending_seek else {
        return SeekReplay::Nothing;
    };

    match result {
        Ok(_) => SeekReplay::OnLoaded(position_ms),
        Err(LoadError::Superseded(_)) => SeekReplay::OnActive(position_ms),
        Err(_) => {
            debug!(position_ms, "Dropping buffered seek for failed load");
            SeekReplay::Nothing
        }
    }
}

/// Re-read the followed session after the pump missed events. Returns true
/// when this is how the pump learns that the media ended.
async fn resync_after_lag(
    controller: &Weak<PlaybackController>,
    status: &RwLock<PlaybackStatus>,
) -> bool {
    let handle = {
        let Some(controller) = controller.upgrade() else {
            return false;
        };
        let followed = controller.status().session_id;
        controller
            .supervisor
            .active()
            .filter(|handle| Some(handle.id()) == followed)
    };
    let Some(handle) = handle else {
        return false;
    };

    let snapshot = match handle.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            debug!(session = %handle.id(), "Cannot resync status: {}", err);
            return false;
        }
    };

    let mut status = write_status(status);
    let before = status.state;
    status.resync(&snapshot);
    info!(
        session = %snapshot.id,
        from = before.as_str(),
        to = status.state.as_str(),
        position_ms = status.position_ms,
        "Status resynced after missed events"
    );
    before != ApplicationState::Ended && status.state == ApplicationState::Ended
}

fn spawn_advance(controller: &Weak<PlaybackController>) {
    let Some(controller) = controller.upgrade() else {
        return;
    };
    tokio::spawn(async move {
        if let Err(err) = controller.navigate(true).await {
            warn!("Auto-advance failed: {}", err);
        }
    });
}

/// Fold bus events of the followed session into the shared status.
async fn pump_events(
    controller: Weak<PlaybackController>,
    status: Arc<RwLock<PlaybackStatus>>,
    mut events: EventSubscriber,
    playback: PlaybackConfig,
    cancel: CancellationToken,
) {
    debug!("Controller event pump started");

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv_with_gaps() => match received {
                Some(received) => received,
                None => break,
            },
        };

        let event = match received {
            Received::Event(event) => event,
            Received::Lagged(_) => {
                if resync_after_lag(&controller, &status).await && playback.auto_advance {
                    spawn_advance(&controller);
                }
                continue;
            }
        };

        let advance = {
            let mut status = write_status(&status);
            if !status.follows(&event.payload) {
                continue;
            }

            let before = status.state;
            status.apply(&event.payload, playback.end_of_media);
            if status.state != before {
                debug!(from = before.as_str(), to = status.state.as_str(), "Application state changed");
            }

            matches!(event.payload, PlaybackEvent::EndReached { .. })
                && !playback.end_of_media.restarts()
                && playback.auto_advance
        };

        if advance {
            spawn_advance(&controller);
        }
    }

    debug!("Controller event pump stopped");
}
