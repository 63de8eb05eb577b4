mod common;

use common::{TestEngine, wait_for};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use segue::{EngineEvent, ErrorKind, PlaybackEvent, PlaybackIntent, SessionId};
use std::collections::HashMap;
use std::time::Duration;

const SOURCES: [&str; 5] = ["s0.mkv", "s1.mkv", "s2.mkv", "s3.mkv", "broken:s4.mkv"];

async fn run_interleaving(seed: u64) -> Vec<EngineEvent> {
    let mut rng = StdRng::seed_from_u64(seed);
    let delays: Vec<u64> = SOURCES.iter().map(|_| rng.gen_range(0..120)).collect();

    let test = TestEngine::builder()
        .event_capacity(8192)
        .behavior(|mut behavior| {
            behavior = behavior
                .with_tick(Duration::from_millis(10))
                .with_load_delay(Duration::from_millis(5));
            for (source, delay) in SOURCES.iter().zip(&delays) {
                behavior = behavior.with_stop_delay_for(*source, Duration::from_millis(*delay));
            }
            behavior
        })
        .build();
    let controller = test.controller().clone();

    let mut pending = Vec::new();
    for _ in 0..14 {
        let intent = match rng.gen_range(0..6) {
            0 | 1 => PlaybackIntent::Load(SOURCES[rng.gen_range(0..SOURCES.len())].into()),
            2 => PlaybackIntent::Play,
            3 => PlaybackIntent::Pause,
            4 => PlaybackIntent::Seek(rng.gen_range(0..5_000)),
            _ => PlaybackIntent::Stop,
        };

        if rng.gen_bool(0.5) {
            let controller = controller.clone();
            pending.push(tokio::spawn(async move {
                let _ = controller.submit(intent).await;
            }));
        } else {
            let _ = controller.submit(intent).await;
        }
        tokio::time::sleep(Duration::from_millis(rng.gen_range(0..30))).await;
    }

    for task in pending {
        task.await.unwrap();
    }

    controller.shutdown();
    wait_for("every session to release", Duration::from_secs(10), || {
        test.settled(0)
    })
    .await;
    // Let the dispatcher drain the last events onto the bus.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let violations = test.factory.surface_violations();
    assert!(violations.is_empty(), "seed {}: {:?}", seed, violations);
    assert!(test.surfaces.live_handles().is_empty(), "seed {}", seed);
    test.events.events()
}

#[tokio::test]
async fn test_surface_released_only_after_owner_released() {
    for seed in [1, 7, 42, 1234, 98765] {
        let events = run_interleaving(seed).await;
        assert!(!events.is_empty());

        let mut session_released_at: HashMap<SessionId, u64> = HashMap::new();
        for event in &events {
            match &event.payload {
                PlaybackEvent::SessionReleased { session_id } => {
                    session_released_at.insert(*session_id, event.sequence);
                }
                PlaybackEvent::SurfaceReleased {
                    surface_id,
                    owner: Some(owner),
                } => {
                    let released = session_released_at.get(owner).unwrap_or_else(|| {
                        panic!(
                            "seed {}: {} released before its owner {} was released",
                            seed, surface_id, owner
                        )
                    });
                    assert!(*released < event.sequence);
                }
                _ => {}
            }
        }
    }
}

#[tokio::test]
async fn test_sessions_are_silent_after_release() {
    for seed in [3, 11, 2024] {
        let events = run_interleaving(seed).await;

        let mut released = HashMap::new();
        let mut sequences = HashMap::new();
        for event in &events {
            let Some(session_id) = event.payload.session_id() else {
                continue;
            };

            // Per-session order is preserved on the bus.
            let last = sequences.insert(session_id, event.sequence);
            assert!(last.is_none_or(|last| last < event.sequence));

            // Timeouts and failed-load reports come from the supervisor,
            // not the worker, so they may trail the release.
            let advisory = matches!(
                event.payload,
                PlaybackEvent::Error {
                    kind: ErrorKind::TeardownTimeout | ErrorKind::LoadError,
                    ..
                }
            );
            if let Some(at) = released.get(&session_id) {
                assert!(
                    advisory,
                    "seed {}: {} produced {:?} after its release at #{}",
                    seed, session_id, event.payload, at
                );
            }
            if matches!(event.payload, PlaybackEvent::SessionReleased { .. }) {
                released.insert(session_id, event.sequence);
            }
        }
    }
}
