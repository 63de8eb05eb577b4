use tracing::debug;

use crate::models::NativeHandle;
use crate::player::{BackendResult, MediaBackend};

/// Bring a backend that has reached the end of its media back to `target_ms`.
///
/// Production backends refuse to seek from their terminal state, so a plain
/// `seek` is not enough. The order is fixed:
/// 1. `stop()`
/// 2. re-assert the render surface (a stop drops the hardware binding)
/// 3. `play()` immediately followed by `pause()` so the backend is seekable
/// 4. `seek(target_ms)`
/// 5. `play()` again if playback should continue
pub(crate) fn rewind_after_end(
    backend: &mut dyn MediaBackend,
    surface: NativeHandle,
    target_ms: u64,
    resume: bool,
) -> BackendResult<()> {
    debug!(backend = backend.name(), target_ms, resume, "Rewinding after end of media");

    backend.stop()?;
    backend.set_surface(Some(surface))?;
    backend.play()?;
    backend.pause()?;
    backend.seek(target_ms)?;
    if resume {
        backend.play()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{
        BackendCall, BackendEvent, BackendEventSink, BackendFactory, SimulatedBackendFactory,
        SimulatedBehavior,
    };
    use crate::utils::BackendError;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    fn ended_backend() -> (Box<dyn MediaBackend>, SimulatedBackendFactory) {
        let behavior = SimulatedBehavior::default()
            .with_tick(Duration::from_millis(5))
            .with_default_duration(25);
        let factory = SimulatedBackendFactory::new(behavior);
        let ended = Arc::new(Mutex::new(false));
        let flag = ended.clone();
        let sink = BackendEventSink::new(move |event| {
            if event == BackendEvent::EndReached {
                *flag.lock().unwrap() = true;
            }
        });

        let mut backend = factory.create(sink).unwrap();
        backend.set_surface(Some(NativeHandle::new(77))).unwrap();
        backend.load(&"clip.mkv".into()).unwrap();
        backend.play().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !*ended.lock().unwrap() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(*ended.lock().unwrap(), "backend never reached the end");
        (backend, factory)
    }

    #[test]
    fn test_naive_seek_fails_from_end() {
        let (mut backend, _factory) = ended_backend();
        assert_eq!(backend.seek(0), Err(BackendError::NotSeekable("ended")));
        backend.release().unwrap();
    }

    #[test]
    fn test_rewind_sequence_order() {
        let (mut backend, factory) = ended_backend();
        rewind_after_end(backend.as_mut(), NativeHandle::new(77), 0, false).unwrap();
        assert_eq!(backend.position_ms(), 0);

        let calls = factory.probes()[0].calls();
        let tail = &calls[calls.len() - 5..];
        assert_eq!(
            tail,
            &[
                BackendCall::Stop,
                BackendCall::SetSurface(Some(NativeHandle::new(77))),
                BackendCall::Play,
                BackendCall::Pause,
                BackendCall::Seek(0),
            ]
        );
        backend.release().unwrap();
    }

    #[test]
    fn test_rewind_with_resume_plays() {
        let (mut backend, factory) = ended_backend();
        rewind_after_end(backend.as_mut(), NativeHandle::new(77), 0, true).unwrap();

        let calls = factory.probes()[0].calls();
        assert_eq!(calls.last(), Some(&BackendCall::Play));
        assert_eq!(factory.probes()[0].phase(), crate::player::simulated::Phase::Playing);
        backend.release().unwrap();
    }
}
