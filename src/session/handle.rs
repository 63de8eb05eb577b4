use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use super::worker::{SessionCommand, WorkerMessage};
use crate::models::{MediaLocator, NativeHandle, ReadyHandle, SessionId, SessionSnapshot, SurfaceId};
use crate::player::BackendResult;
use crate::utils::{EngineError, EngineResult, LoadError};

/// Handle to send commands to a session worker
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    source: MediaLocator,
    sender: mpsc::UnboundedSender<WorkerMessage>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("sender", &"<UnboundedSender>")
            .finish()
    }
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        source: MediaLocator,
        sender: mpsc::UnboundedSender<WorkerMessage>,
    ) -> Self {
        Self { id, source, sender }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source(&self) -> &MediaLocator {
        &self.source
    }

    /// Whether the worker has stopped taking commands.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Load the session's media; resolves once the backend is ready.
    pub async fn load(&self) -> Result<ReadyHandle, LoadError> {
        let (respond_to, response) = oneshot::channel();
        self.send(SessionCommand::Load { respond_to })
            .map_err(|_| LoadError::WorkerGone)?;
        response.await.map_err(|_| LoadError::WorkerGone)?
    }

    pub async fn play(&self) -> EngineResult<()> {
        self.request(|respond_to| SessionCommand::Play { respond_to })
            .await
    }

    pub async fn pause(&self) -> EngineResult<()> {
        self.request(|respond_to| SessionCommand::Pause { respond_to })
            .await
    }

    pub async fn seek(&self, position_ms: u64) -> EngineResult<()> {
        self.request(|respond_to| SessionCommand::Seek {
            position_ms,
            respond_to,
        })
        .await
    }

    /// Move rendering to `surface_id`; the previous surface is released by
    /// the worker once the backend no longer draws into it.
    pub async fn rebind(&self, surface_id: SurfaceId, native_handle: NativeHandle) -> EngineResult<()> {
        self.request(|respond_to| SessionCommand::Rebind {
            surface_id,
            native_handle,
            respond_to,
        })
        .await
    }

    pub async fn snapshot(&self) -> EngineResult<SessionSnapshot> {
        let (respond_to, response) = oneshot::channel();
        self.send(SessionCommand::GetSnapshot { respond_to })?;
        response.await.map_err(|_| EngineError::SessionGone(self.id))
    }

    /// Ask the worker to tear down. Returns immediately; completion is
    /// reported through the session's `Released` event.
    pub fn retire(&self) {
        if self.send(SessionCommand::Retire).is_err() {
            trace!(session = %self.id, "Retire sent to a worker that already exited");
        }
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<BackendResult<()>>) -> SessionCommand,
    ) -> EngineResult<()> {
        let (respond_to, response) = oneshot::channel();
        self.send(command(respond_to))?;
        response
            .await
            .map_err(|_| EngineError::SessionGone(self.id))?
            .map_err(|error| EngineError::Backend {
                session: self.id,
                error,
            })
    }

    fn send(&self, command: SessionCommand) -> EngineResult<()> {
        self.sender
            .send(WorkerMessage::Command(command))
            .map_err(|_| EngineError::SessionGone(self.id))
    }
}
