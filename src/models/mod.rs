mod identifiers;
pub mod session;

pub use identifiers::{MediaLocator, NativeHandle, SessionId, SurfaceId};
pub use session::{
    ApplicationState, PlaybackIntent, ReadyHandle, SessionSnapshot, SessionState,
};
