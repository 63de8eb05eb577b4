use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::events::{EventBus, PlaybackEvent};
use crate::models::{MediaLocator, ReadyHandle, SessionId, SurfaceId};
use crate::player::BackendFactory;
use crate::services::PositionStore;
use crate::session::{SessionContext, SessionEvent, SessionEventKind, SessionHandle, SessionWorker};
use crate::surface::{SurfaceBroker, TeardownReceipt};
use crate::utils::{EngineError, EngineResult, ErrorKind, LoadError, SurfaceError};

/// A session that lost the active slot and is still tearing down.
#[derive(Debug, Clone)]
pub struct RetiringSession {
    pub session_id: SessionId,
    pub source: MediaLocator,
    pub surface_id: SurfaceId,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
struct ActiveSession {
    handle: SessionHandle,
    surface_id: SurfaceId,
}

#[derive(Debug)]
struct Retiring {
    handle: SessionHandle,
    surface_id: SurfaceId,
    since: Instant,
}

#[derive(Debug, Default)]
struct Registry {
    active: Option<ActiveSession>,
    /// Switch number that produced the active session.
    active_switch: u64,
    retiring: HashMap<SessionId, Retiring>,
    shut_down: bool,
}

/// State shared between the supervisor and its dispatcher task.
struct Shared {
    registry: Mutex<Registry>,
    broker: Arc<SurfaceBroker>,
    bus: Arc<EventBus>,
    teardown_timeout: Duration,
    runtime: Handle,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move a session into the retiring set and tell its worker to tear down.
    fn begin_retire(self: &Arc<Self>, session: ActiveSession) {
        let session_id = session.handle.id();
        if let Err(err) = self.broker.mark_pending_release(session.surface_id) {
            warn!(session = %session_id, "Cannot mark surface pending release: {}", err);
        }

        self.registry().retiring.insert(
            session_id,
            Retiring {
                handle: session.handle.clone(),
                surface_id: session.surface_id,
                since: Instant::now(),
            },
        );
        session.handle.retire();
        debug!(session = %session_id, surface = %session.surface_id, "Session retiring");

        self.watch_teardown(session_id);
    }

    fn watch_teardown(self: &Arc<Self>, session_id: SessionId) {
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(shared.teardown_timeout).await;

            let overdue = shared
                .registry()
                .retiring
                .get(&session_id)
                .map(|retiring| retiring.since.elapsed());

            if let Some(elapsed) = overdue {
                warn!(
                    session = %session_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Session teardown is taking longer than expected"
                );
                shared
                    .bus
                    .publish(PlaybackEvent::Error {
                        session_id,
                        kind: ErrorKind::TeardownTimeout,
                        message: format!("still retiring after {} ms", elapsed.as_millis()),
                    })
                    .await;
            }
        });
    }

    fn finish_retire(&self, session_id: SessionId) {
        if let Some(retiring) = self.registry().retiring.remove(&session_id) {
            info!(
                session = %session_id,
                surface = %retiring.surface_id,
                elapsed_ms = retiring.since.elapsed().as_millis() as u64,
                "Session released"
            );
        }
    }

    /// A fault in the active session takes it out of the active slot.
    fn session_failed(self: &Arc<Self>, session_id: SessionId) {
        let failed = {
            let mut registry = self.registry();
            match &registry.active {
                Some(active) if active.handle.id() == session_id => registry.active.take(),
                _ => None,
            }
        };

        if let Some(failed) = failed {
            warn!(session = %session_id, "Active session failed, retiring it");
            self.begin_retire(failed);
        }
    }
}

/// Creates a session per load request and hands playback over to it once it
/// is ready, retiring the previous session in the background.
pub struct SessionSupervisor {
    shared: Arc<Shared>,
    factory: Arc<dyn BackendFactory>,
    store: Arc<dyn PositionStore>,
    config: EngineConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    switches: AtomicU64,
}

impl SessionSupervisor {
    /// Must be called from within a tokio runtime; the event dispatcher is
    /// spawned here.
    pub fn new(
        config: &EngineConfig,
        broker: Arc<SurfaceBroker>,
        factory: Arc<dyn BackendFactory>,
        store: Arc<dyn PositionStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            broker,
            bus,
            teardown_timeout: config.teardown.timeout(),
            runtime: Handle::current(),
        });

        // Ends by itself once the supervisor and every worker are gone.
        shared.runtime.spawn(dispatch(shared.clone(), receiver));

        Self {
            shared,
            factory,
            store,
            config: config.clone(),
            events,
            switches: AtomicU64::new(0),
        }
    }

    pub fn broker(&self) -> &Arc<SurfaceBroker> {
        &self.shared.broker
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    /// Load `source` on a brand-new session and make it active once ready.
    ///
    /// The previous active session keeps playing until the new one is ready
    /// and is then retired without waiting for its teardown. On failure the
    /// active session is left untouched.
    pub async fn switch_to(&self, source: MediaLocator) -> Result<ReadyHandle, LoadError> {
        let switch = self.switches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.shared.registry().shut_down {
            return Err(LoadError::WorkerGone);
        }
        info!(%source, switch, "Switching media");

        let broker = &self.shared.broker;
        let surface_id = broker.allocate()?;
        let session_id = SessionId::next();
        let native_handle = match broker.native_handle(surface_id) {
            Some(native_handle) => native_handle,
            None => return Err(SurfaceError::UnknownSurface(surface_id).into()),
        };
        broker.bind(surface_id, session_id)?;

        let spawned = SessionWorker::spawn(SessionContext {
            id: session_id,
            source: source.clone(),
            surface_id,
            native_handle,
            broker: broker.clone(),
            factory: self.factory.clone(),
            store: self.store.clone(),
            resume: self.config.resume.clone(),
            end_of_media: self.config.playback.end_of_media,
            events: self.events.clone(),
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                // No backend ever touched the surface.
                self.release_unused_surface(surface_id, session_id);
                return Err(err);
            }
        };

        let session = ActiveSession {
            handle: handle.clone(),
            surface_id,
        };

        let ready = match handle.load().await {
            Ok(ready) => ready,
            Err(err) => {
                warn!(session = %session_id, %source, "Switch failed: {}", err);
                self.shared.begin_retire(session);
                self.shared
                    .bus
                    .publish(PlaybackEvent::Error {
                        session_id,
                        kind: err.kind(),
                        message: err.to_string(),
                    })
                    .await;
                return Err(err);
            }
        };

        let promoted = {
            let mut registry = self.shared.registry();
            if registry.shut_down {
                Err(LoadError::WorkerGone)
            } else if switch < registry.active_switch {
                Err(LoadError::Superseded(source.clone()))
            } else {
                registry.active_switch = switch;
                Ok(registry.active.replace(session.clone()))
            }
        };

        match promoted {
            Ok(previous) => {
                info!(session = %session_id, surface = %surface_id, "Session active");
                if let Some(previous) = previous {
                    self.shared.begin_retire(previous);
                }
                Ok(ready)
            }
            Err(err) => {
                debug!(session = %session_id, "Ready session not promoted: {}", err);
                self.shared.begin_retire(session);
                Err(err)
            }
        }
    }

    /// Handle to the active session, if any.
    pub fn active(&self) -> Option<SessionHandle> {
        self.shared
            .registry()
            .active
            .as_ref()
            .map(|active| active.handle.clone())
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.shared
            .registry()
            .active
            .as_ref()
            .map(|active| active.handle.id())
    }

    pub fn active_surface_id(&self) -> Option<SurfaceId> {
        self.shared
            .registry()
            .active
            .as_ref()
            .map(|active| active.surface_id)
    }

    /// Sessions still tearing down, oldest first.
    pub fn retiring_sessions(&self) -> Vec<RetiringSession> {
        let registry = self.shared.registry();
        let mut sessions: Vec<_> = registry
            .retiring
            .iter()
            .map(|(session_id, retiring)| RetiringSession {
                session_id: *session_id,
                source: retiring.handle.source().clone(),
                surface_id: retiring.surface_id,
                elapsed: retiring.since.elapsed(),
            })
            .collect();
        sessions.sort_by(|a, b| b.elapsed.cmp(&a.elapsed));
        sessions
    }

    /// Give the active session a fresh surface and release its current one
    /// through the usual pending-release path.
    pub async fn migrate_surface(&self) -> EngineResult<SurfaceId> {
        let active = self
            .shared
            .registry()
            .active
            .clone()
            .ok_or(EngineError::NoActiveSession)?;
        let session_id = active.handle.id();
        let broker = &self.shared.broker;

        let surface_id = broker.allocate()?;
        let native_handle = broker
            .native_handle(surface_id)
            .ok_or(SurfaceError::UnknownSurface(surface_id))?;
        if let Err(err) = broker.bind(surface_id, session_id) {
            if let Err(discard_err) = broker.discard(surface_id) {
                warn!(surface = %surface_id, "Failed to discard surface: {}", discard_err);
            }
            return Err(err.into());
        }

        match active.handle.rebind(surface_id, native_handle).await {
            Ok(()) => {}
            Err(EngineError::SessionGone(_)) => {
                self.release_unused_surface(surface_id, session_id);
                return Err(EngineError::SessionGone(session_id));
            }
            Err(err) => return Err(err),
        }

        let mut registry = self.shared.registry();
        if let Some(current) = registry.active.as_mut()
            && current.handle.id() == session_id
        {
            current.surface_id = surface_id;
        }
        Ok(surface_id)
    }

    /// Retire the active session and refuse further switches. Retiring
    /// sessions keep finishing in the background.
    pub fn shutdown(&self) {
        let active = {
            let mut registry = self.shared.registry();
            if registry.shut_down {
                return;
            }
            registry.shut_down = true;
            registry.active.take()
        };

        info!("Session supervisor shutting down");
        if let Some(active) = active {
            self.shared.begin_retire(active);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.registry().shut_down
    }

    /// Return a surface that was bound to a session whose worker will never
    /// touch it.
    fn release_unused_surface(&self, surface_id: SurfaceId, session_id: SessionId) {
        let broker = &self.shared.broker;
        let result = broker
            .mark_pending_release(surface_id)
            .and_then(|_| broker.confirm_released(TeardownReceipt::new(surface_id, session_id)));
        if let Err(err) = result {
            warn!(surface = %surface_id, "Failed to release unused surface: {}", err);
        }
    }
}

/// Forward session events to the bus, keeping per-session order.
async fn dispatch(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    debug!("Session event dispatcher started");

    while let Some(SessionEvent { session_id, kind }) = events.recv().await {
        let payload = match kind {
            SessionEventKind::PositionChanged(position_ms) => Some(PlaybackEvent::PositionChanged {
                session_id,
                position_ms,
            }),
            SessionEventKind::DurationChanged(duration_ms) => Some(PlaybackEvent::DurationChanged {
                session_id,
                duration_ms,
            }),
            SessionEventKind::StateChanged(state) => state
                .to_application_state()
                .map(|state| PlaybackEvent::StateChanged { session_id, state }),
            SessionEventKind::EndReached => Some(PlaybackEvent::EndReached { session_id }),
            SessionEventKind::Error { kind, message } => {
                shared.session_failed(session_id);
                Some(PlaybackEvent::Error {
                    session_id,
                    kind,
                    message,
                })
            }
            SessionEventKind::Released => {
                shared.finish_retire(session_id);
                Some(PlaybackEvent::SessionReleased { session_id })
            }
            SessionEventKind::SurfaceReleased(released) => Some(PlaybackEvent::SurfaceReleased {
                surface_id: released.surface_id,
                owner: released.session_id,
            }),
        };

        match payload {
            Some(payload) => shared.bus.publish(payload).await,
            None => trace!(session = %session_id, "Internal session event not published"),
        }
    }

    debug!("Session event dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{SimulatedBackendFactory, SimulatedBehavior};
    use crate::services::NoopPositionStore;
    use crate::surface::HeadlessSurfaceProvider;

    fn supervisor(behavior: SimulatedBehavior) -> (SessionSupervisor, SimulatedBackendFactory) {
        let factory = SimulatedBackendFactory::new(behavior);
        let broker = Arc::new(SurfaceBroker::new(Arc::new(HeadlessSurfaceProvider::default())));
        let supervisor = SessionSupervisor::new(
            &EngineConfig::default(),
            broker,
            Arc::new(factory.clone()),
            Arc::new(NoopPositionStore),
            Arc::new(EventBus::new(64, 64)),
        );
        (supervisor, factory)
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_switch_promotes_and_retires_previous() {
        let (supervisor, _factory) = supervisor(SimulatedBehavior::default());

        let first = supervisor.switch_to("a.mkv".into()).await.unwrap();
        assert_eq!(supervisor.active_session_id(), Some(first.session_id));
        assert_eq!(supervisor.active_surface_id(), Some(first.surface_id));

        let second = supervisor.switch_to("b.mkv".into()).await.unwrap();
        assert_eq!(supervisor.active_session_id(), Some(second.session_id));
        assert_ne!(first.surface_id, second.surface_id);

        wait_until(|| supervisor.retiring_sessions().is_empty()).await;
        wait_until(|| supervisor.broker().get(first.surface_id).is_none()).await;
        assert_eq!(supervisor.broker().surfaces().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_active() {
        let (supervisor, _factory) = supervisor(SimulatedBehavior::default());
        let first = supervisor.switch_to("a.mkv".into()).await.unwrap();

        let err = supervisor
            .switch_to("unsupported:b.avi".into())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Unsupported { .. }));
        assert_eq!(err.kind(), ErrorKind::LoadError);
        assert_eq!(supervisor.active_session_id(), Some(first.session_id));

        wait_until(|| supervisor.broker().surfaces().len() == 1).await;
    }

    #[tokio::test]
    async fn test_retiring_set_tracks_slow_teardown() {
        let behavior =
            SimulatedBehavior::default().with_stop_delay_for("a.mkv", Duration::from_millis(300));
        let (supervisor, _factory) = supervisor(behavior);

        let first = supervisor.switch_to("a.mkv".into()).await.unwrap();
        supervisor.switch_to("b.mkv".into()).await.unwrap();

        let retiring = supervisor.retiring_sessions();
        assert_eq!(retiring.len(), 1);
        assert_eq!(retiring[0].session_id, first.session_id);
        assert_eq!(retiring[0].source.as_str(), "a.mkv");

        wait_until(|| supervisor.retiring_sessions().is_empty()).await;
    }

    #[tokio::test]
    async fn test_migrate_surface() {
        let (supervisor, factory) = supervisor(SimulatedBehavior::default());
        let ready = supervisor.switch_to("a.mkv".into()).await.unwrap();

        let migrated = supervisor.migrate_surface().await.unwrap();
        assert_ne!(migrated, ready.surface_id);
        assert_eq!(supervisor.active_surface_id(), Some(migrated));

        wait_until(|| supervisor.broker().get(ready.surface_id).is_none()).await;
        let handle = supervisor.broker().native_handle(migrated).unwrap();
        assert_eq!(factory.probes()[0].surface(), Some(handle));
    }

    #[tokio::test]
    async fn test_shutdown_refuses_switches() {
        let (supervisor, _factory) = supervisor(SimulatedBehavior::default());
        supervisor.switch_to("a.mkv".into()).await.unwrap();

        supervisor.shutdown();
        assert!(supervisor.is_shut_down());
        assert_eq!(supervisor.active_session_id(), None);
        assert_eq!(
            supervisor.switch_to("b.mkv".into()).await.unwrap_err(),
            LoadError::WorkerGone
        );
        assert!(matches!(
            supervisor.migrate_surface().await,
            Err(EngineError::NoActiveSession)
        ));

        wait_until(|| supervisor.broker().surfaces().is_empty()).await;
    }
}
