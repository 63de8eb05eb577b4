pub mod event_bus;
pub mod types;

pub use event_bus::{EventBus, EventBusStats, EventFilter, EventSubscriber, Received};
pub use types::{EngineEvent, EventType, PlaybackEvent};
