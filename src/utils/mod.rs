pub mod errors;

pub use errors::{BackendError, EngineError, EngineResult, ErrorKind, LoadError, SurfaceError};
