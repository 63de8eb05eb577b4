use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use super::handle::SessionHandle;
use super::restart::rewind_after_end;
use super::{SessionEvent, SessionEventKind};
use crate::config::{EndOfMediaPolicy, ResumeConfig};
use crate::models::{
    MediaLocator, NativeHandle, ReadyHandle, SessionId, SessionSnapshot, SessionState, SurfaceId,
};
use crate::player::{BackendEvent, BackendEventSink, BackendFactory, BackendResult, MediaBackend};
use crate::services::PositionStore;
use crate::surface::{SurfaceBroker, TeardownReceipt};
use crate::utils::{BackendError, ErrorKind, LoadError};

/// Commands a [`SessionHandle`] sends to its worker.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Open the media on a fresh backend and report readiness
    Load {
        respond_to: oneshot::Sender<Result<ReadyHandle, LoadError>>,
    },
    Play {
        respond_to: oneshot::Sender<BackendResult<()>>,
    },
    Pause {
        respond_to: oneshot::Sender<BackendResult<()>>,
    },
    Seek {
        position_ms: u64,
        respond_to: oneshot::Sender<BackendResult<()>>,
    },
    /// Move rendering to another surface and release the current one
    Rebind {
        surface_id: SurfaceId,
        native_handle: NativeHandle,
        respond_to: oneshot::Sender<BackendResult<()>>,
    },
    GetSnapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
    /// Tear down and exit; nothing is sent back
    Retire,
}

#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Command(SessionCommand),
    Backend(BackendEvent),
}

/// Everything a worker needs from the engine around it.
pub struct SessionContext {
    pub id: SessionId,
    pub source: MediaLocator,
    pub surface_id: SurfaceId,
    pub native_handle: NativeHandle,
    pub broker: Arc<SurfaceBroker>,
    pub factory: Arc<dyn BackendFactory>,
    pub store: Arc<dyn PositionStore>,
    pub resume: ResumeConfig,
    pub end_of_media: EndOfMediaPolicy,
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// Owns exactly one backend instance and runs its whole lifecycle on a
/// dedicated thread, so blocking native calls never stall anyone else.
pub struct SessionWorker {
    ctx: SessionContext,
    inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    sink: BackendEventSink,
    backend: Option<Box<dyn MediaBackend>>,
    snapshot: SessionSnapshot,
    surface: (SurfaceId, NativeHandle),
    loaded: bool,
}

impl SessionWorker {
    /// Start the worker thread for a session bound to `ctx.surface_id`.
    ///
    /// The backend is only created once `load()` is requested through the
    /// returned handle.
    pub fn spawn(ctx: SessionContext) -> Result<SessionHandle, LoadError> {
        let (sender, inbox) = mpsc::unbounded_channel();

        // Backend callbacks must not keep the worker alive on their own.
        let weak = sender.downgrade();
        let sink = BackendEventSink::new(move |event| {
            if let Some(sender) = weak.upgrade() {
                let _ = sender.send(WorkerMessage::Backend(event));
            }
        });

        let id = ctx.id;
        let source = ctx.source.clone();
        let worker = SessionWorker {
            snapshot: SessionSnapshot::new(id, source.clone(), Some(ctx.surface_id)),
            surface: (ctx.surface_id, ctx.native_handle),
            ctx,
            inbox,
            sink,
            backend: None,
            loaded: false,
        };

        thread::Builder::new()
            .name(format!("session-{}", id.as_u64()))
            .spawn(move || worker.run())
            .map_err(|err| LoadError::Backend {
                locator: source.clone(),
                error: BackendError::Fault(format!("failed to start session thread: {}", err)),
            })?;

        Ok(SessionHandle::new(id, source, sender))
    }

    fn run(mut self) {
        debug!(session = %self.ctx.id, source = %self.ctx.source, "Session worker started");

        while let Some(message) = self.inbox.blocking_recv() {
            match message {
                WorkerMessage::Command(SessionCommand::Retire) => {
                    trace!(session = %self.ctx.id, "Retire requested");
                    break;
                }
                WorkerMessage::Command(command) => self.handle_command(command),
                WorkerMessage::Backend(event) => self.handle_backend_event(event),
            }
        }

        self.teardown();
        debug!(session = %self.ctx.id, "Session worker exited");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Load { respond_to } => {
                trace!(session = %self.ctx.id, "Loading media");
                let result = self.load();
                let _ = respond_to.send(result);
            }
            SessionCommand::Play { respond_to } => {
                trace!(session = %self.ctx.id, "Starting playback");
                let result = self.play();
                let _ = respond_to.send(self.log_failure("play", result));
            }
            SessionCommand::Pause { respond_to } => {
                trace!(session = %self.ctx.id, "Pausing playback");
                let result = self.pause();
                let _ = respond_to.send(self.log_failure("pause", result));
            }
            SessionCommand::Seek {
                position_ms,
                respond_to,
            } => {
                trace!(session = %self.ctx.id, position_ms, "Seeking");
                let result = self.seek(position_ms);
                let _ = respond_to.send(self.log_failure("seek", result));
            }
            SessionCommand::Rebind {
                surface_id,
                native_handle,
                respond_to,
            } => {
                trace!(session = %self.ctx.id, surface = %surface_id, "Rebinding surface");
                let result = self.rebind(surface_id, native_handle);
                let _ = respond_to.send(self.log_failure("rebind", result));
            }
            SessionCommand::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot.clone());
            }
            SessionCommand::Retire => {}
        }
    }

    fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Position(position_ms) => {
                // Stray ticks around seeks and restarts would make the
                // position jump backwards for observers.
                if self.snapshot.state == SessionState::Playing && !self.snapshot.ended {
                    self.snapshot.position_ms = position_ms;
                    self.emit(SessionEventKind::PositionChanged(position_ms));
                }
            }
            BackendEvent::Duration(duration_ms) => {
                if duration_ms != self.snapshot.duration_ms {
                    self.snapshot.duration_ms = duration_ms;
                    self.emit(SessionEventKind::DurationChanged(duration_ms));
                }
            }
            BackendEvent::EndReached => self.end_reached(),
            BackendEvent::Fault(message) => self.fault(message),
        }
    }

    fn load(&mut self) -> Result<ReadyHandle, LoadError> {
        let source = self.ctx.source.clone();
        if self.backend.is_some() || self.snapshot.state != SessionState::Loading {
            return Err(LoadError::Backend {
                locator: source,
                error: BackendError::InvalidState(self.snapshot.state.as_str()),
            });
        }

        let started = Instant::now();
        let duration_ms = match self.open(&source) {
            Ok(duration_ms) => duration_ms,
            Err(err) => {
                warn!(session = %self.ctx.id, %source, "Load failed: {}", err);
                self.snapshot.state = SessionState::Error;
                return Err(err);
            }
        };

        self.loaded = true;
        self.snapshot.duration_ms = duration_ms;
        self.emit(SessionEventKind::DurationChanged(duration_ms));
        self.set_state(SessionState::Ready);

        if let Some(saved_ms) = self.ctx.store.get_saved_position(&source)
            && self.ctx.resume.should_resume(saved_ms, duration_ms)
        {
            self.resume_from(saved_ms);
        }

        info!(
            session = %self.ctx.id,
            %source,
            duration_ms,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session ready"
        );

        Ok(ReadyHandle {
            session_id: self.ctx.id,
            surface_id: self.surface.0,
            duration_ms,
            position_ms: self.snapshot.position_ms,
        })
    }

    fn open(&mut self, source: &MediaLocator) -> Result<u64, LoadError> {
        let mut backend = self
            .ctx
            .factory
            .create(self.sink.clone())
            .map_err(|err| LoadError::from_backend(source, err))?;

        let result = backend
            .set_surface(Some(self.surface.1))
            .and_then(|_| backend.load(source));

        // Kept even on failure so teardown still releases it.
        self.backend = Some(backend);
        result.map_err(|err| LoadError::from_backend(source, err))
    }

    fn resume_from(&mut self, saved_ms: u64) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };

        match backend.seek(saved_ms) {
            Ok(()) => {
                debug!(session = %self.ctx.id, saved_ms, "Resuming from saved position");
                self.snapshot.position_ms = saved_ms;
                self.emit(SessionEventKind::PositionChanged(saved_ms));
            }
            Err(err) => {
                warn!(session = %self.ctx.id, saved_ms, "Resume seek failed: {}", err);
            }
        }
    }

    fn play(&mut self) -> BackendResult<()> {
        self.ensure_controllable()?;
        if self.snapshot.ended {
            return self.rewind(0, true);
        }

        self.backend_mut()?.play()?;
        self.set_state(SessionState::Playing);
        Ok(())
    }

    fn pause(&mut self) -> BackendResult<()> {
        self.ensure_controllable()?;
        if self.snapshot.ended {
            // Already sitting on the last frame.
            return Ok(());
        }

        self.backend_mut()?.pause()?;
        self.set_state(SessionState::Paused);
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) -> BackendResult<()> {
        self.ensure_controllable()?;
        if self.snapshot.ended {
            return self.rewind(position_ms, false);
        }

        self.backend_mut()?.seek(position_ms)?;
        let position_ms = self.clamp(position_ms);
        self.snapshot.position_ms = position_ms;
        self.emit(SessionEventKind::PositionChanged(position_ms));
        Ok(())
    }

    fn rewind(&mut self, target_ms: u64, resume: bool) -> BackendResult<()> {
        let native_handle = self.surface.1;
        let backend = self.backend_mut()?;
        rewind_after_end(&mut **backend, native_handle, target_ms, resume)?;

        self.snapshot.ended = false;
        let target_ms = self.clamp(target_ms);
        self.snapshot.position_ms = target_ms;
        self.emit(SessionEventKind::PositionChanged(target_ms));
        // Always announced, even when unchanged: observers may still
        // consider the media ended.
        let state = if resume {
            SessionState::Playing
        } else {
            SessionState::Paused
        };
        debug!(session = %self.ctx.id, to = state.as_str(), "Rewound after end of media");
        self.snapshot.state = state;
        self.emit(SessionEventKind::StateChanged(state));
        Ok(())
    }

    fn end_reached(&mut self) {
        let settled = matches!(self.snapshot.state, SessionState::Playing | SessionState::Paused);
        if self.snapshot.ended || !settled {
            return;
        }

        info!(session = %self.ctx.id, "End of media reached");
        self.snapshot.ended = true;
        self.snapshot.position_ms = self.snapshot.duration_ms;
        self.emit(SessionEventKind::EndReached);

        let policy = self.ctx.end_of_media;
        if policy.restarts()
            && let Err(err) = self.rewind(0, policy.resumes())
        {
            self.fault(format!("restart after end of media failed: {}", err));
        }
    }

    fn fault(&mut self, message: String) {
        if matches!(
            self.snapshot.state,
            SessionState::Error | SessionState::Stopping | SessionState::Released
        ) {
            return;
        }

        error!(session = %self.ctx.id, "Backend fault: {}", message);
        self.set_state(SessionState::Error);
        self.emit(SessionEventKind::Error {
            kind: ErrorKind::BackendFault,
            message,
        });
    }

    fn rebind(&mut self, surface_id: SurfaceId, native_handle: NativeHandle) -> BackendResult<()> {
        let previous = self.surface.0;
        let result = self
            .backend_mut()
            .and_then(|backend| backend.set_surface(Some(native_handle)));

        // Whichever surface the backend is not drawing into goes back.
        let unused = match result {
            Ok(()) => {
                self.surface = (surface_id, native_handle);
                self.snapshot.surface_id = Some(surface_id);
                info!(session = %self.ctx.id, from = %previous, to = %surface_id, "Surface migrated");
                previous
            }
            Err(_) => surface_id,
        };
        self.release_surface(unused);
        result
    }

    fn teardown(&mut self) {
        debug!(session = %self.ctx.id, "Tearing down session");
        self.set_state(SessionState::Stopping);

        if let Some(mut backend) = self.backend.take() {
            if self.loaded {
                let duration_ms = self.snapshot.duration_ms;
                let position_ms = if self.snapshot.ended {
                    duration_ms
                } else {
                    backend.position_ms()
                };
                self.ctx
                    .store
                    .save_position(&self.ctx.source, position_ms, duration_ms);
            }

            let started = Instant::now();
            if let Err(err) = backend.stop() {
                warn!(session = %self.ctx.id, "Backend stop failed: {}", err);
            }
            if let Err(err) = backend.set_surface(None) {
                warn!(session = %self.ctx.id, "Surface detach failed: {}", err);
            }
            if let Err(err) = backend.release() {
                warn!(session = %self.ctx.id, "Backend release failed: {}", err);
            }
            drop(backend);
            debug!(
                session = %self.ctx.id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Native teardown complete"
            );
        }

        self.set_state(SessionState::Released);
        self.emit(SessionEventKind::Released);
        self.release_surface(self.surface.0);
    }

    fn release_surface(&self, surface_id: SurfaceId) {
        let broker = &self.ctx.broker;
        if let Err(err) = broker.mark_pending_release(surface_id) {
            warn!(session = %self.ctx.id, surface = %surface_id, "Cannot mark surface pending: {}", err);
        }

        match broker.confirm_released(TeardownReceipt::new(surface_id, self.ctx.id)) {
            Ok(released) => self.emit(SessionEventKind::SurfaceReleased(released)),
            Err(err) => {
                error!(session = %self.ctx.id, surface = %surface_id, "Surface release refused: {}", err);
            }
        }
    }

    fn ensure_controllable(&self) -> BackendResult<()> {
        match self.snapshot.state {
            SessionState::Ready | SessionState::Playing | SessionState::Paused => Ok(()),
            state => Err(BackendError::InvalidState(state.as_str())),
        }
    }

    fn backend_mut(&mut self) -> BackendResult<&mut Box<dyn MediaBackend>> {
        self.backend
            .as_mut()
            .ok_or(BackendError::InvalidState("unloaded"))
    }

    fn clamp(&self, position_ms: u64) -> u64 {
        match self.snapshot.duration_ms {
            0 => position_ms,
            duration_ms => position_ms.min(duration_ms),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.snapshot.state == state {
            return;
        }

        debug!(
            session = %self.ctx.id,
            from = self.snapshot.state.as_str(),
            to = state.as_str(),
            "Session state changed"
        );
        self.snapshot.state = state;
        self.emit(SessionEventKind::StateChanged(state));
    }

    fn emit(&self, kind: SessionEventKind) {
        if self
            .ctx
            .events
            .send(SessionEvent::new(self.ctx.id, kind))
            .is_err()
        {
            trace!(session = %self.ctx.id, "Event dispatcher gone, dropping event");
        }
    }

    fn log_failure(&self, operation: &'static str, result: BackendResult<()>) -> BackendResult<()> {
        if let Err(err) = &result {
            warn!(session = %self.ctx.id, operation, "Command failed: {}", err);
        }
        result
    }
}
