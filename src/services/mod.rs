pub mod persistence;
pub mod sequencing;

pub use persistence::{MemoryPositionStore, NoopPositionStore, PositionStore, SavedPosition};
pub use sequencing::{MediaSequencer, PlaylistSequencer, SingleItemSequencer};
