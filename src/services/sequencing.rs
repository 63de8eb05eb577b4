use async_trait::async_trait;
use std::sync::RwLock;

use crate::models::MediaLocator;

/// Resolves navigation intents to the next source (playlist or browse order).
#[async_trait]
pub trait MediaSequencer: Send + Sync {
    async fn next(&self, current: &MediaLocator) -> Option<MediaLocator>;
    async fn previous(&self, current: &MediaLocator) -> Option<MediaLocator>;
}

/// Sequencer with nothing before or after anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleItemSequencer;

#[async_trait]
impl MediaSequencer for SingleItemSequencer {
    async fn next(&self, _current: &MediaLocator) -> Option<MediaLocator> {
        None
    }

    async fn previous(&self, _current: &MediaLocator) -> Option<MediaLocator> {
        None
    }
}

/// Fixed ordered list of sources.
#[derive(Debug, Default)]
pub struct PlaylistSequencer {
    items: RwLock<Vec<MediaLocator>>,
    wrap: bool,
}

impl PlaylistSequencer {
    pub fn new(items: Vec<MediaLocator>) -> Self {
        Self {
            items: RwLock::new(items),
            wrap: false,
        }
    }

    /// Loop back to the first item after the last one (and vice versa).
    pub fn wrapping(mut self) -> Self {
        self.wrap = true;
        self
    }

    pub fn push(&self, item: MediaLocator) {
        self.items
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(item);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<MediaLocator>> {
        self.items
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn step(&self, current: &MediaLocator, forward: bool) -> Option<MediaLocator> {
        let items = self.read();
        let index = items.iter().position(|item| item == current)?;
        let len = items.len();

        let target = if forward {
            if index + 1 < len {
                index + 1
            } else if self.wrap {
                0
            } else {
                return None;
            }
        } else if index > 0 {
            index - 1
        } else if self.wrap {
            len - 1
        } else {
            return None;
        };

        (target != index).then(|| items[target].clone())
    }
}

#[async_trait]
impl MediaSequencer for PlaylistSequencer {
    async fn next(&self, current: &MediaLocator) -> Option<MediaLocator> {
        self.step(current, true)
    }

    async fn previous(&self, current: &MediaLocator) -> Option<MediaLocator> {
        self.step(current, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist() -> PlaylistSequencer {
        PlaylistSequencer::new(vec!["a.mkv".into(), "b.mkv".into(), "c.mkv".into()])
    }

    #[tokio::test]
    async fn test_navigation() {
        let sequencer = playlist();
        assert_eq!(sequencer.next(&"a.mkv".into()).await, Some("b.mkv".into()));
        assert_eq!(sequencer.previous(&"b.mkv".into()).await, Some("a.mkv".into()));
        assert_eq!(sequencer.next(&"c.mkv".into()).await, None);
        assert_eq!(sequencer.previous(&"a.mkv".into()).await, None);
        assert_eq!(sequencer.next(&"z.mkv".into()).await, None);
    }

    #[tokio::test]
    async fn test_wrapping() {
        let sequencer = playlist().wrapping();
        assert_eq!(sequencer.next(&"c.mkv".into()).await, Some("a.mkv".into()));
        assert_eq!(sequencer.previous(&"a.mkv".into()).await, Some("c.mkv".into()));

        let single = PlaylistSequencer::new(vec!["only.mkv".into()]).wrapping();
        assert_eq!(single.next(&"only.mkv".into()).await, None);
    }
}
