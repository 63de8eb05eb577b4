use segue::player::{SimulatedBackendFactory, SimulatedBehavior, SimulatedProbe};
use segue::services::{MemoryPositionStore, PlaylistSequencer, SingleItemSequencer};
use segue::surface::HeadlessSurfaceProvider;
use segue::{
    EndOfMediaPolicy, Engine, EngineConfig, MediaLocator, MediaSequencer, PlaybackController,
};
use std::sync::Arc;
use std::time::Duration;

use super::EventCollector;

/// An engine wired to simulated collaborators, with handles on all of them.
pub struct TestEngine {
    pub engine: Engine,
    pub factory: SimulatedBackendFactory,
    pub surfaces: Arc<HeadlessSurfaceProvider>,
    pub positions: Arc<MemoryPositionStore>,
    pub events: EventCollector,
}

impl TestEngine {
    pub fn builder() -> TestEngineBuilder {
        TestEngineBuilder::default()
    }

    pub fn controller(&self) -> &Arc<PlaybackController> {
        &self.engine.controller
    }

    pub fn probe(&self, source: &str) -> SimulatedProbe {
        self.factory
            .probe_for(source)
            .unwrap_or_else(|| panic!("no backend was created for {}", source))
    }

    /// True once nothing is retiring and only `live` surfaces remain.
    pub fn settled(&self, live: usize) -> bool {
        self.engine.supervisor.retiring_sessions().is_empty()
            && self.engine.broker.surfaces().len() == live
    }
}

pub struct TestEngineBuilder {
    config: EngineConfig,
    behavior: SimulatedBehavior,
    playlist: Option<Vec<MediaLocator>>,
    positions: MemoryPositionStore,
}

impl Default for TestEngineBuilder {
    fn default() -> Self {
        let mut config = EngineConfig::default();
        config.playback.end_of_media = EndOfMediaPolicy::Finish;
        Self {
            config,
            behavior: SimulatedBehavior::default().with_tick(Duration::from_millis(5)),
            playlist: None,
            positions: MemoryPositionStore::new(),
        }
    }
}

impl TestEngineBuilder {
    pub fn policy(mut self, policy: EndOfMediaPolicy) -> Self {
        self.config.playback.end_of_media = policy;
        self
    }

    pub fn autoplay(mut self, autoplay: bool) -> Self {
        self.config.playback.autoplay = autoplay;
        self
    }

    pub fn auto_advance(mut self, auto_advance: bool) -> Self {
        self.config.playback.auto_advance = auto_advance;
        self
    }

    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.config.teardown.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.events.capacity = capacity;
        self.config.events.history_size = capacity;
        self
    }

    pub fn behavior(mut self, configure: impl FnOnce(SimulatedBehavior) -> SimulatedBehavior) -> Self {
        self.behavior = configure(self.behavior);
        self
    }

    pub fn playlist(mut self, sources: &[&str]) -> Self {
        self.playlist = Some(sources.iter().map(|source| MediaLocator::new(*source)).collect());
        self
    }

    pub fn saved_position(mut self, source: &str, position_ms: u64) -> Self {
        self.positions = self.positions.with_position(source, position_ms);
        self
    }

    pub fn build(self) -> TestEngine {
        let factory = SimulatedBackendFactory::new(self.behavior);
        let surfaces = Arc::new(HeadlessSurfaceProvider::default());
        let positions = Arc::new(self.positions);
        let sequencer: Arc<dyn MediaSequencer> = match self.playlist {
            Some(items) => Arc::new(PlaylistSequencer::new(items)),
            None => Arc::new(SingleItemSequencer),
        };

        let engine = Engine::builder(self.config)
            .with_backend(Arc::new(factory.clone()))
            .with_surfaces(surfaces.clone())
            .with_positions(positions.clone())
            .with_sequencer(sequencer)
            .build();
        let events = EventCollector::start(&engine.bus);

        TestEngine {
            engine,
            factory,
            surfaces,
            positions,
            events,
        }
    }
}
