use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use segue::player::{SimulatedBackendFactory, SimulatedBehavior};
use segue::services::{MemoryPositionStore, PlaylistSequencer};
use segue::{EndOfMediaPolicy, Engine, EngineConfig, MediaLocator, PlaybackIntent};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Finish,
    RestartPaused,
    RestartPlaying,
}

impl From<PolicyArg> for EndOfMediaPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Finish => EndOfMediaPolicy::Finish,
            PolicyArg::RestartPaused => EndOfMediaPolicy::RestartPaused,
            PolicyArg::RestartPlaying => EndOfMediaPolicy::RestartPlaying,
        }
    }
}

/// Play a list of sources through simulated backends, switching between them
/// while previous sessions tear down in the background.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sources to play in order (`missing:`, `unsupported:` and `broken:`
    /// prefixes simulate failures)
    #[arg(value_name = "SOURCE")]
    sources: Vec<String>,

    /// Engine configuration file (defaults to the user config directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// What to do when media ends
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Simulated media duration
    #[arg(long, value_name = "MS", default_value_t = 3_000)]
    duration_ms: u64,

    /// Switch to the next source after this long
    #[arg(long, value_name = "MS", default_value_t = 1_000)]
    switch_after_ms: u64,

    /// Stall every backend's stop() for this long
    #[arg(long, value_name = "MS", default_value_t = 0)]
    slow_teardown_ms: u64,

    /// Move the last session onto a new surface before shutting down
    #[arg(long)]
    migrate: bool,

    /// Print bus events as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("segue=debug")),
        )
        .init();

    let args = Args::parse();
    info!("Starting segue demo");

    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load().unwrap_or_else(|err| {
            warn!("Using default configuration: {:#}", err);
            EngineConfig::default()
        }),
    };
    if let Some(policy) = args.policy {
        config.playback.end_of_media = policy.into();
    }

    let sources: Vec<MediaLocator> = if args.sources.is_empty() {
        vec!["intro.mkv".into(), "feature.mkv".into(), "credits.mkv".into()]
    } else {
        args.sources.iter().map(MediaLocator::new).collect()
    };

    let behavior = SimulatedBehavior::default()
        .with_default_duration(args.duration_ms)
        .with_stop_delay(Duration::from_millis(args.slow_teardown_ms));
    let engine = Engine::builder(config)
        .with_backend(Arc::new(SimulatedBackendFactory::new(behavior)))
        .with_positions(Arc::new(MemoryPositionStore::new()))
        .with_sequencer(Arc::new(PlaylistSequencer::new(sources.clone())))
        .build();

    let printer = tokio::spawn(print_events(engine.bus.subscribe(), args.json));

    run(&engine, &sources, &args).await?;

    engine.controller.shutdown();
    wait_for_teardown(&engine, Duration::from_secs(10)).await;

    let stats = engine.bus.get_stats().await;
    let surfaces = engine.broker.stats();
    info!(
        events = stats.total_events,
        dropped = stats.dropped_events,
        surfaces_allocated = surfaces.allocated,
        surfaces_released = surfaces.released,
        "Demo finished"
    );

    printer.abort();
    Ok(())
}

async fn run(engine: &Engine, sources: &[MediaLocator], args: &Args) -> Result<()> {
    let controller = &engine.controller;
    let dwell = Duration::from_millis(args.switch_after_ms);

    let Some(first) = sources.first() else {
        return Ok(());
    };
    if let Err(err) = controller
        .submit(PlaybackIntent::Load(first.clone()))
        .await
    {
        warn!(source = %first, "Initial load failed: {}", err);
    }

    for _ in 1..sources.len() {
        tokio::time::sleep(dwell).await;
        let started = Instant::now();
        match controller.submit(PlaybackIntent::NavigateNext).await {
            Ok(()) => info!(
                switch_ms = started.elapsed().as_millis() as u64,
                retiring = engine.supervisor.retiring_sessions().len(),
                "Switched"
            ),
            Err(err) => warn!("Switch failed: {}", err),
        }
    }

    tokio::time::sleep(dwell).await;
    if args.migrate {
        let surface = controller
            .migrate_surface()
            .await
            .context("Surface migration failed")?;
        info!(%surface, "Migrated to new surface");
        tokio::time::sleep(dwell).await;
    }

    let status = controller.snapshot();
    info!(
        state = status.state.as_str(),
        position_ms = status.position_ms,
        duration_ms = status.duration_ms,
        "Final playback status"
    );
    Ok(())
}

async fn wait_for_teardown(engine: &Engine, limit: Duration) {
    let deadline = Instant::now() + limit;
    while !engine.supervisor.retiring_sessions().is_empty() || !engine.broker.surfaces().is_empty()
    {
        if Instant::now() >= deadline {
            warn!(
                retiring = engine.supervisor.retiring_sessions().len(),
                "Gave up waiting for teardown"
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn print_events(mut events: segue::EventSubscriber, json: bool) {
    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(err) => warn!("Failed to encode event: {}", err),
            }
        } else {
            println!("#{:<4} {:<28} {:?}", event.sequence, event.event_type().as_str(), event.payload);
        }
    }
}
