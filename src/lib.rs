// Non-blocking media session engine.
//
// A new backend session is created for every switch and promoted once it is
// ready; the previous one tears down on its own thread. Render surfaces are
// never shared between live sessions and are only released after the owning
// session confirms its native teardown.

pub mod config;
pub mod constants;
pub mod controller;
pub mod engine;
pub mod events;
pub mod models;
pub mod player;
pub mod services;
pub mod session;
pub mod supervisor;
pub mod surface;
pub mod utils;

pub use config::{EndOfMediaPolicy, EngineConfig};
pub use controller::{PlaybackController, PlaybackStatus};
pub use engine::{Engine, EngineBuilder};
pub use events::{EngineEvent, EventBus, EventFilter, EventSubscriber, EventType, PlaybackEvent};
pub use models::{
    ApplicationState, MediaLocator, NativeHandle, PlaybackIntent, ReadyHandle, SessionId,
    SessionSnapshot, SessionState, SurfaceId,
};
pub use services::{MediaSequencer, PositionStore};
pub use session::{SessionHandle, SessionWorker};
pub use supervisor::{RetiringSession, SessionSupervisor};
pub use surface::{Surface, SurfaceBroker, SurfaceProvider, SurfaceState};
pub use utils::{BackendError, EngineError, EngineResult, ErrorKind, LoadError, SurfaceError};
