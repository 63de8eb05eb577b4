#![allow(dead_code)]

pub mod builders;

pub use builders::{TestEngine, TestEngineBuilder};

use segue::{EngineEvent, EventBus, PlaybackEvent, SessionId};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Poll `condition` until it holds, failing the test after `timeout`.
pub async fn wait_for(what: &str, timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Records every bus event from the moment it is started.
pub struct EventCollector {
    events: Arc<Mutex<Vec<EngineEvent>>>,
    task: JoinHandle<()>,
}

impl EventCollector {
    pub fn start(bus: &EventBus) -> Self {
        let mut subscriber = bus.subscribe();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = subscriber.recv().await {
                sink.lock().unwrap().push(event);
            }
        });
        Self { events, task }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<PlaybackEvent> {
        self.events().into_iter().map(|event| event.payload).collect()
    }

    pub fn count(&self, predicate: impl Fn(&PlaybackEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| predicate(&event.payload))
            .count()
    }

    pub fn any(&self, predicate: impl Fn(&PlaybackEvent) -> bool) -> bool {
        self.count(predicate) > 0
    }

    pub fn positions_of(&self, session: SessionId) -> usize {
        self.count(|event| {
            matches!(event, PlaybackEvent::PositionChanged { session_id, .. } if *session_id == session)
        })
    }

    pub fn released_surfaces(&self) -> usize {
        self.count(|event| matches!(event, PlaybackEvent::SurfaceReleased { .. }))
    }

    pub async fn wait_for_event(
        &self,
        what: &str,
        timeout: Duration,
        predicate: impl Fn(&PlaybackEvent) -> bool,
    ) {
        wait_for(what, timeout, || self.any(&predicate)).await;
    }
}

impl Drop for EventCollector {
    fn drop(&mut self) {
        self.task.abort();
    }
}
