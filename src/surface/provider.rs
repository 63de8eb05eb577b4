use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

use crate::models::NativeHandle;
use crate::utils::SurfaceError;

/// Platform side of render targets (windows, GL areas, video sinks).
pub trait SurfaceProvider: Send + Sync {
    fn allocate(&self) -> Result<NativeHandle, SurfaceError>;

    /// Destroy the backing resource. Only called once the surface is released.
    fn destroy(&self, handle: NativeHandle);
}

#[derive(Debug, Default)]
struct HandlePool {
    next: u64,
    free: Vec<NativeHandle>,
    live: HashSet<NativeHandle>,
    destroyed: Vec<NativeHandle>,
    failures_pending: usize,
}

/// Offscreen provider that hands out integer handles and, like most window
/// systems, recycles the most recently destroyed handle first.
#[derive(Debug, Default)]
pub struct HeadlessSurfaceProvider {
    pool: Mutex<HandlePool>,
}

impl HeadlessSurfaceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` allocations fail.
    pub fn fail_next_allocations(&self, count: usize) {
        self.pool().failures_pending = count;
    }

    pub fn live_handles(&self) -> Vec<NativeHandle> {
        let mut live: Vec<_> = self.pool().live.iter().copied().collect();
        live.sort_by_key(|h| h.as_raw());
        live
    }

    pub fn destroyed_handles(&self) -> Vec<NativeHandle> {
        self.pool().destroyed.clone()
    }

    fn pool(&self) -> std::sync::MutexGuard<'_, HandlePool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SurfaceProvider for HeadlessSurfaceProvider {
    fn allocate(&self) -> Result<NativeHandle, SurfaceError> {
        let mut pool = self.pool();
        if pool.failures_pending > 0 {
            pool.failures_pending -= 1;
            return Err(SurfaceError::AllocationFailed(
                "headless display refused a new target".to_string(),
            ));
        }

        let handle = match pool.free.pop() {
            Some(handle) => handle,
            None => {
                pool.next += 1;
                NativeHandle::new(0x400000 + pool.next)
            }
        };
        pool.live.insert(handle);
        debug!(%handle, "Allocated headless surface");
        Ok(handle)
    }

    fn destroy(&self, handle: NativeHandle) {
        let mut pool = self.pool();
        if pool.live.remove(&handle) {
            pool.free.push(handle);
            pool.destroyed.push(handle);
            debug!(%handle, "Destroyed headless surface");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recycles_destroyed_handles() {
        let provider = HeadlessSurfaceProvider::new();
        let a = provider.allocate().unwrap();
        let b = provider.allocate().unwrap();
        assert_ne!(a, b);

        provider.destroy(a);
        assert_eq!(provider.allocate().unwrap(), a);
        assert_eq!(provider.live_handles().len(), 2);
    }

    #[test]
    fn test_injected_failures() {
        let provider = HeadlessSurfaceProvider::new();
        provider.fail_next_allocations(1);
        assert!(provider.allocate().is_err());
        assert!(provider.allocate().is_ok());
    }
}
