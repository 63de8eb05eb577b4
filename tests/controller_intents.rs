mod common;

use common::{TestEngine, wait_for};
use segue::player::BackendCall;
use segue::{
    ApplicationState, EngineError, ErrorKind, LoadError, PlaybackEvent, PlaybackIntent, SessionId,
};
use std::time::Duration;

#[tokio::test]
async fn test_play_pause_and_stop() {
    let test = TestEngine::builder().autoplay(false).build();
    let controller = test.controller();

    let ready = controller.load("a.mkv".into()).await.unwrap();
    assert_eq!(ready.position_ms, 0);
    assert_eq!(controller.state(), ApplicationState::Paused);
    assert_eq!(controller.duration_ms(), 60_000);

    controller.submit(PlaybackIntent::Play).await.unwrap();
    wait_for("playing", Duration::from_secs(1), || {
        controller.state() == ApplicationState::Playing
    })
    .await;

    controller.submit(PlaybackIntent::Stop).await.unwrap();
    wait_for("held still", Duration::from_secs(1), || {
        controller.state() == ApplicationState::Paused
    })
    .await;

    let calls = test.probe("a.mkv").calls();
    assert_eq!(calls.last(), Some(&BackendCall::Pause));
    assert!(!calls.contains(&BackendCall::Stop));
}

#[tokio::test]
async fn test_seek_during_load_is_replayed() {
    let test = TestEngine::builder()
        .behavior(|b| b.with_load_delay(Duration::from_millis(100)))
        .build();
    let controller = test.controller().clone();

    let loading = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.load("a.mkv".into()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    controller.submit(PlaybackIntent::Seek(2_000)).await.unwrap();
    controller.submit(PlaybackIntent::Seek(4_000)).await.unwrap();

    let ready = loading.await.unwrap().unwrap();
    wait_for("seek to apply", Duration::from_secs(1), || {
        controller.position_ms() >= 4_000
    })
    .await;

    let calls = test.probe("a.mkv").calls();
    assert!(calls.contains(&BackendCall::Seek(4_000)));
    assert!(!calls.contains(&BackendCall::Seek(2_000)), "only the last seek is kept");
    assert_eq!(controller.current_session_id(), Some(ready.session_id));
}

#[tokio::test]
async fn test_failed_load_drops_buffered_seek() {
    let test = TestEngine::builder()
        .behavior(|b| b.with_load_delay(Duration::from_millis(80)))
        .build();
    let controller = test.controller().clone();
    controller.load("a.mkv".into()).await.unwrap();

    let loading = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.load("missing:b.mkv".into()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    controller.submit(PlaybackIntent::Seek(9_000)).await.unwrap();

    let err = loading.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::Load(LoadError::NotFound(_))), "{:?}", err);

    // Neither the failed session nor the surviving one received the seek.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!test.probe("a.mkv").calls().contains(&BackendCall::Seek(9_000)));
    assert!(controller.position_ms() < 9_000);
    assert_eq!(controller.state(), ApplicationState::Playing);
}

#[tokio::test]
async fn test_seek_after_fast_switch_reaches_active_session() {
    let test = TestEngine::builder()
        .behavior(|b| b.with_load_delay_for("slow-b.mkv", Duration::from_millis(400)))
        .build();
    let controller = test.controller().clone();
    controller.load("a.mkv".into()).await.unwrap();

    let slow = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.load("slow-b.mkv".into()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let c = controller.load("c.mkv".into()).await.unwrap();

    // C is active and nothing newer is loading, so the seek applies now.
    controller.submit(PlaybackIntent::Seek(7_000)).await.unwrap();
    assert!(test.probe("c.mkv").calls().contains(&BackendCall::Seek(7_000)));
    wait_for("c to reach the seek target", Duration::from_secs(1), || {
        controller.position_ms() >= 7_000
    })
    .await;

    let err = slow.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::Load(LoadError::Superseded(_))), "{:?}", err);
    assert_eq!(controller.current_session_id(), Some(c.session_id));

    // Nothing is left over for the next, unrelated switch.
    let d = controller.load("d.mkv".into()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!test.probe("d.mkv").calls().contains(&BackendCall::Seek(7_000)));
    assert_eq!(controller.current_session_id(), Some(d.session_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_switches_follow_the_active_session() {
    let delays = [30, 5, 20, 0, 15, 25, 10, 0];
    let sources: Vec<String> = (0..delays.len()).map(|i| format!("s{}.mkv", i)).collect();
    let test = TestEngine::builder()
        .autoplay(false)
        .behavior(|mut behavior| {
            for (source, delay) in sources.iter().zip(delays) {
                behavior = behavior.with_load_delay_for(source.as_str(), Duration::from_millis(delay));
            }
            behavior
        })
        .build();
    let controller = test.controller().clone();

    for _ in 0..5 {
        let loads: Vec<_> = sources
            .iter()
            .map(|source| {
                let controller = controller.clone();
                let source = source.clone();
                tokio::spawn(async move { controller.load(source.into()).await })
            })
            .collect();
        for load in loads {
            let _ = load.await.unwrap();
        }

        let active = test.engine.supervisor.active_session_id();
        assert!(active.is_some());
        assert_eq!(controller.current_session_id(), active);
    }

    // The followed session is the one that actually plays.
    controller.submit(PlaybackIntent::Play).await.unwrap();
    wait_for("active session to play", Duration::from_secs(1), || {
        controller.state() == ApplicationState::Playing
    })
    .await;
    let position = controller.position_ms();
    wait_for("positions to advance", Duration::from_secs(1), || {
        controller.position_ms() > position
    })
    .await;
}

#[tokio::test]
async fn test_status_recovers_after_missed_events() {
    let test = TestEngine::builder().autoplay(false).event_capacity(4).build();
    let controller = test.controller();

    let ready = controller.load("a.mkv".into()).await.unwrap();
    let handle = test.engine.supervisor.active().unwrap();
    handle.play().await.unwrap();

    // Overrun the bus before the controller gets to read the state change.
    for position_ms in 0..32 {
        test.engine
            .bus
            .publish(PlaybackEvent::PositionChanged {
                session_id: SessionId::new(u64::MAX),
                position_ms,
            })
            .await;
    }

    wait_for("state to catch up", Duration::from_secs(1), || {
        controller.state() == ApplicationState::Playing
    })
    .await;
    assert_eq!(controller.current_session_id(), Some(ready.session_id));
}

#[tokio::test]
async fn test_navigation_follows_sequence() {
    let test = TestEngine::builder()
        .autoplay(false)
        .playlist(&["a.mkv", "b.mkv", "c.mkv"])
        .build();
    let controller = test.controller();
    let source = || controller.snapshot().source.map(|source| source.to_string());

    controller.load("b.mkv".into()).await.unwrap();
    controller.submit(PlaybackIntent::NavigateNext).await.unwrap();
    assert_eq!(source().as_deref(), Some("c.mkv"));

    // Past the end is a no-op, not an error.
    controller.submit(PlaybackIntent::NavigateNext).await.unwrap();
    assert_eq!(source().as_deref(), Some("c.mkv"));
    assert_eq!(test.factory.created_count(), 2);

    controller.submit(PlaybackIntent::NavigatePrevious).await.unwrap();
    controller.submit(PlaybackIntent::NavigatePrevious).await.unwrap();
    assert_eq!(source().as_deref(), Some("a.mkv"));
    controller.submit(PlaybackIntent::NavigatePrevious).await.unwrap();
    assert_eq!(source().as_deref(), Some("a.mkv"));
    assert_eq!(test.factory.created_count(), 4);
}

#[tokio::test]
async fn test_recovers_from_backend_fault() {
    let test = TestEngine::builder().build();
    let controller = test.controller();

    let broken = controller.load("broken:a.mkv".into()).await.unwrap();
    wait_for("fault", Duration::from_secs(2), || {
        controller.state() == ApplicationState::Error
    })
    .await;
    assert!(test.events.any(|event| matches!(
        event,
        PlaybackEvent::Error { session_id, kind: ErrorKind::BackendFault, .. }
            if *session_id == broken.session_id
    )));

    wait_for("faulted session to leave", Duration::from_secs(1), || {
        test.engine.supervisor.active_session_id().is_none()
    })
    .await;
    assert!(matches!(
        controller.submit(PlaybackIntent::Play).await,
        Err(EngineError::NoActiveSession)
    ));

    controller.load("b.mkv".into()).await.unwrap();
    wait_for("recovered", Duration::from_secs(1), || {
        controller.state() == ApplicationState::Playing
    })
    .await;
    wait_for("faulted session to release", Duration::from_secs(2), || test.settled(1)).await;
}

#[tokio::test]
async fn test_resume_and_save_positions() {
    let test = TestEngine::builder()
        .autoplay(false)
        .saved_position("a.mkv", 12_000)
        .build();
    let controller = test.controller();

    let ready = controller.load("a.mkv".into()).await.unwrap();
    assert_eq!(ready.position_ms, 12_000);
    assert_eq!(controller.position_ms(), 12_000);

    test.probe("a.mkv").advance_to(25_000);
    controller.load("b.mkv".into()).await.unwrap();
    wait_for("a to save its position", Duration::from_secs(2), || {
        test.positions.get(&"a.mkv".into()).map(|saved| saved.position_ms) == Some(25_000)
    })
    .await;

    // Sources without a saved position start from the top.
    let fresh = controller.load("c.mkv".into()).await.unwrap();
    assert_eq!(fresh.position_ms, 0);

    let again = controller.load("a.mkv".into()).await.unwrap();
    assert_eq!(again.position_ms, 25_000);
}

#[tokio::test]
async fn test_migrate_surface_keeps_session() {
    let test = TestEngine::builder().build();
    let controller = test.controller();

    let ready = controller.load("a.mkv".into()).await.unwrap();
    let old_handle = test.probe("a.mkv").surface().unwrap();

    let surface = controller.migrate_surface().await.unwrap();
    assert_ne!(surface, ready.surface_id);
    assert_eq!(test.engine.supervisor.active_surface_id(), Some(surface));
    assert_ne!(test.probe("a.mkv").surface(), Some(old_handle));

    test.events
        .wait_for_event("old surface release", Duration::from_secs(1), |event| {
            matches!(event, PlaybackEvent::SurfaceReleased { surface_id, .. } if *surface_id == ready.surface_id)
        })
        .await;
    assert!(!test.events.any(|event| matches!(event, PlaybackEvent::SessionReleased { .. })));
    assert_eq!(controller.current_session_id(), Some(ready.session_id));
    assert!(test.surfaces.destroyed_handles().contains(&old_handle));
    assert_eq!(test.engine.broker.surfaces().len(), 1);
}

#[tokio::test]
async fn test_teardown_timeout_is_advisory() {
    let test = TestEngine::builder()
        .teardown_timeout(Duration::from_millis(50))
        .behavior(|b| b.with_stop_delay_for("a.mkv", Duration::from_millis(400)))
        .build();
    let controller = test.controller();

    let a = controller.load("a.mkv".into()).await.unwrap();
    controller.load("b.mkv".into()).await.unwrap();

    test.events
        .wait_for_event("teardown timeout", Duration::from_secs(1), |event| {
            matches!(event, PlaybackEvent::Error { session_id, kind: ErrorKind::TeardownTimeout, .. }
                if *session_id == a.session_id)
        })
        .await;
    assert_eq!(controller.state(), ApplicationState::Playing);

    // The slow session still finishes tearing down.
    wait_for("a to release", Duration::from_secs(2), || test.settled(1)).await;
    assert!(test.probe("a.mkv").is_released());
}

#[tokio::test]
async fn test_shutdown_rejects_further_intents() {
    let test = TestEngine::builder().build();
    let controller = test.controller();

    controller.load("a.mkv".into()).await.unwrap();
    controller.shutdown();
    controller.shutdown();

    assert!(matches!(
        controller.submit(PlaybackIntent::Play).await,
        Err(EngineError::ShutDown)
    ));
    assert!(matches!(
        controller.load("b.mkv".into()).await,
        Err(EngineError::ShutDown)
    ));

    wait_for("everything to release", Duration::from_secs(2), || test.settled(0)).await;
    assert!(test.probe("a.mkv").is_released());
    assert!(test.surfaces.live_handles().is_empty());
}
