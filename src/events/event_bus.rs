use super::types::{EngineEvent, EventType, PlaybackEvent};
use crate::models::SessionId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, broadcast};
use tracing::{trace, warn};

/// One delivery from [`EventSubscriber::recv_with_gaps`].
#[derive(Debug, Clone)]
pub enum Received {
    Event(EngineEvent),
    /// This many events were dropped before they could be read.
    Lagged(u64),
}

/// Event subscriber handle
pub struct EventSubscriber {
    receiver: broadcast::Receiver<EngineEvent>,
    filter: Option<EventFilter>,
}

impl EventSubscriber {
    /// Create a new subscriber with an optional filter
    pub fn new(receiver: broadcast::Receiver<EngineEvent>, filter: Option<EventFilter>) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next event matching the filter.
    ///
    /// Returns `None` once the bus is gone. A lagging subscriber skips the
    /// overwritten events and keeps going.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.recv_with_gaps().await? {
                Received::Event(event) => return Some(event),
                Received::Lagged(_) => {}
            }
        }
    }

    /// Like [`recv`](Self::recv), but reports when events were overwritten
    /// before this subscriber saw them, so state built from the stream can
    /// be re-read from its source.
    pub async fn recv_with_gaps(&mut self) -> Option<Received> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Received::Event(event));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged behind the bus");
                    return Some(Received::Lagged(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive without blocking
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(event);
                    }
                    // Continue to next event
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged behind the bus");
                }
                Err(_) => return None,
            }
        }
    }

    fn accepts(&self, event: &EngineEvent) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| filter.matches(&event.payload))
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    event_types: Option<Vec<EventType>>,
    sessions: Option<Vec<SessionId>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(mut self, types: Vec<EventType>) -> Self {
        self.event_types = Some(types);
        self
    }

    /// Only events produced by these sessions. Surface events never match.
    pub fn with_sessions(mut self, sessions: Vec<SessionId>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn matches(&self, event: &PlaybackEvent) -> bool {
        if let Some(ref types) = self.event_types
            && !types.contains(&event.event_type())
        {
            return false;
        }

        if let Some(ref sessions) = self.sessions {
            match event.session_id() {
                Some(id) if sessions.contains(&id) => {}
                _ => return false,
            }
        }

        true
    }
}

/// Fan-out of engine events to UI and persistence collaborators.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    sequence: AtomicU64,
    stats: Arc<RwLock<EventBusStats>>,
    event_history: Arc<RwLock<VecDeque<EngineEvent>>>,
    max_history_size: usize,
}

#[derive(Debug, Default, Clone)]
pub struct EventBusStats {
    pub total_events: u64,
    pub events_by_type: HashMap<&'static str, u64>,
    pub subscriber_count: usize,
    pub dropped_events: u64,
}

impl EventBus {
    /// Create a new event bus with specified buffer capacity and history size
    pub fn new(capacity: usize, max_history_size: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            sequence: AtomicU64::new(0),
            stats: Arc::new(RwLock::new(EventBusStats::default())),
            event_history: Arc::new(RwLock::new(VecDeque::with_capacity(max_history_size))),
            max_history_size,
        }
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, payload: PlaybackEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let event = EngineEvent::new(sequence, payload);
        trace!(sequence, event_type = event.event_type().as_str(), "Publishing event");

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().as_str())
                .or_insert(0) += 1;
        }

        if self.max_history_size > 0 {
            let mut history = self.event_history.write().await;
            if history.len() == self.max_history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        if self.sender.send(event).is_err() {
            // No subscribers is normal, don't log
            self.stats.write().await.dropped_events += 1;
        }
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber::new(self.sender.subscribe(), None)
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventSubscriber {
        EventSubscriber::new(self.sender.subscribe(), Some(filter))
    }

    /// Subscribe to specific event types
    pub fn subscribe_to_types(&self, types: Vec<EventType>) -> EventSubscriber {
        self.subscribe_filtered(EventFilter::new().with_types(types))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub async fn get_stats(&self) -> EventBusStats {
        let stats = self.stats.read().await;
        EventBusStats {
            subscriber_count: self.subscriber_count(),
            ..stats.clone()
        }
    }

    /// Get event history for debugging
    pub async fn get_history(&self) -> Vec<EngineEvent> {
        self.event_history.read().await.iter().cloned().collect()
    }

    /// Event history as a JSON array, for diagnostics dumps.
    pub async fn history_json(&self) -> serde_json::Result<String> {
        let history = self.get_history().await;
        serde_json::to_string_pretty(&history)
    }

    pub async fn clear_history(&self) {
        self.event_history.write().await.clear();
    }
}
