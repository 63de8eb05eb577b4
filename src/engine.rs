use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::controller::PlaybackController;
use crate::events::EventBus;
use crate::player::{BackendFactory, SimulatedBackendFactory};
use crate::services::{MediaSequencer, NoopPositionStore, PositionStore, SingleItemSequencer};
use crate::supervisor::SessionSupervisor;
use crate::surface::{HeadlessSurfaceProvider, SurfaceBroker, SurfaceProvider};

/// A fully wired engine: bus, broker, supervisor and controller.
pub struct Engine {
    pub controller: Arc<PlaybackController>,
    pub supervisor: Arc<SessionSupervisor>,
    pub broker: Arc<SurfaceBroker>,
    pub bus: Arc<EventBus>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }
}

/// Collaborators default to in-process stand-ins: simulated backends,
/// headless surfaces, no position persistence and no playlist.
pub struct EngineBuilder {
    config: EngineConfig,
    factory: Option<Arc<dyn BackendFactory>>,
    surfaces: Option<Arc<dyn SurfaceProvider>>,
    positions: Option<Arc<dyn PositionStore>>,
    sequencer: Option<Arc<dyn MediaSequencer>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            factory: None,
            surfaces: None,
            positions: None,
            sequencer: None,
        }
    }

    pub fn with_backend(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_surfaces(mut self, provider: Arc<dyn SurfaceProvider>) -> Self {
        self.surfaces = Some(provider);
        self
    }

    pub fn with_positions(mut self, store: Arc<dyn PositionStore>) -> Self {
        self.positions = Some(store);
        self
    }

    pub fn with_sequencer(mut self, sequencer: Arc<dyn MediaSequencer>) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Engine {
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(SimulatedBackendFactory::default()));
        let surfaces = self
            .surfaces
            .unwrap_or_else(|| Arc::new(HeadlessSurfaceProvider::default()));
        let positions = self
            .positions
            .unwrap_or_else(|| Arc::new(NoopPositionStore));
        let sequencer = self
            .sequencer
            .unwrap_or_else(|| Arc::new(SingleItemSequencer));

        let bus = Arc::new(EventBus::new(
            self.config.events.capacity,
            self.config.events.history_size,
        ));
        let broker = Arc::new(SurfaceBroker::new(surfaces));
        let supervisor = Arc::new(SessionSupervisor::new(
            &self.config,
            broker.clone(),
            factory,
            positions,
            bus.clone(),
        ));
        let controller = PlaybackController::new(&self.config, supervisor.clone(), sequencer);

        info!(
            end_of_media = ?self.config.playback.end_of_media,
            autoplay = self.config.playback.autoplay,
            "Engine started"
        );

        Engine {
            controller,
            supervisor,
            broker,
            bus,
        }
    }
}
