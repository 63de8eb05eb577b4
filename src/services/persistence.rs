use std::collections::HashMap;
use std::sync::Mutex;
use tracing::trace;

use crate::models::MediaLocator;

/// Saved playback position for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedPosition {
    pub position_ms: u64,
    pub duration_ms: u64,
}

/// Position-persistence collaborator.
///
/// Consulted only when a session is created and when it retires; periodic
/// saving is the collaborator's own business, driven by `PositionChanged`
/// events. Called from session worker threads, so implementations must not
/// assume an async runtime.
pub trait PositionStore: Send + Sync {
    fn get_saved_position(&self, source: &MediaLocator) -> Option<u64>;
    fn save_position(&self, source: &MediaLocator, position_ms: u64, duration_ms: u64);
}

/// Store that forgets everything; for callers without persistence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPositionStore;

impl PositionStore for NoopPositionStore {
    fn get_saved_position(&self, _source: &MediaLocator) -> Option<u64> {
        None
    }

    fn save_position(&self, _source: &MediaLocator, _position_ms: u64, _duration_ms: u64) {}
}

#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    positions: Mutex<HashMap<MediaLocator, SavedPosition>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(self, source: impl Into<MediaLocator>, position_ms: u64) -> Self {
        self.save_position(&source.into(), position_ms, 0);
        self
    }

    pub fn get(&self, source: &MediaLocator) -> Option<SavedPosition> {
        self.positions().get(source).copied()
    }

    fn positions(&self) -> std::sync::MutexGuard<'_, HashMap<MediaLocator, SavedPosition>> {
        self.positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PositionStore for MemoryPositionStore {
    fn get_saved_position(&self, source: &MediaLocator) -> Option<u64> {
        self.positions().get(source).map(|saved| saved.position_ms)
    }

    fn save_position(&self, source: &MediaLocator, position_ms: u64, duration_ms: u64) {
        trace!(%source, position_ms, duration_ms, "Saving position");
        self.positions().insert(
            source.clone(),
            SavedPosition {
                position_ms,
                duration_ms,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryPositionStore::new().with_position("a.mkv", 12_000);
        assert_eq!(store.get_saved_position(&"a.mkv".into()), Some(12_000));
        assert_eq!(store.get_saved_position(&"b.mkv".into()), None);

        store.save_position(&"a.mkv".into(), 15_000, 60_000);
        assert_eq!(
            store.get(&"a.mkv".into()),
            Some(SavedPosition {
                position_ms: 15_000,
                duration_ms: 60_000
            })
        );
    }
}
