use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::provider::SurfaceProvider;
use crate::models::{NativeHandle, SessionId, SurfaceId};
use crate::utils::SurfaceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SurfaceState {
    Active,
    PendingRelease,
    Released,
}

impl SurfaceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurfaceState::Active => "active",
            SurfaceState::PendingRelease => "pending_release",
            SurfaceState::Released => "released",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Surface {
    pub id: SurfaceId,
    pub native_handle: NativeHandle,
    pub owner_session_id: Option<SessionId>,
    pub state: SurfaceState,
}

/// Proof that a session worker finished its native teardown of a surface.
///
/// Only the session worker can mint one, which is what lets the broker refuse
/// releases that would race ahead of the backend.
#[derive(Debug)]
pub struct TeardownReceipt {
    surface_id: SurfaceId,
    session_id: SessionId,
}

impl TeardownReceipt {
    pub(crate) fn new(surface_id: SurfaceId, session_id: SessionId) -> Self {
        Self {
            surface_id,
            session_id,
        }
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.surface_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedEvent {
    pub surface_id: SurfaceId,
    pub native_handle: NativeHandle,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BrokerStats {
    pub allocated: u64,
    pub released: u64,
    pub active: usize,
    pub pending_release: usize,
}

/// Registry of render surfaces; one fresh surface per playback switch.
pub struct SurfaceBroker {
    provider: Arc<dyn SurfaceProvider>,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    surfaces: HashMap<SurfaceId, Surface>,
    allocated: u64,
    released: u64,
}

impl SurfaceBroker {
    pub fn new(provider: Arc<dyn SurfaceProvider>) -> Self {
        Self {
            provider,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Allocate a brand-new surface. Never hands out a surface that is
    /// already known to the registry.
    pub fn allocate(&self) -> Result<SurfaceId, SurfaceError> {
        let native_handle = self.provider.allocate()?;
        let mut registry = self.registry();

        // Released surfaces leave the registry, so anything found here is live.
        if registry
            .surfaces
            .values()
            .any(|surface| surface.native_handle == native_handle)
        {
            return Err(SurfaceError::HandleInUse(native_handle));
        }

        let id = SurfaceId::next();
        registry.surfaces.insert(
            id,
            Surface {
                id,
                native_handle,
                owner_session_id: None,
                state: SurfaceState::Active,
            },
        );
        registry.allocated += 1;
        debug!(surface = %id, handle = %native_handle, "Surface allocated");
        Ok(id)
    }

    pub fn bind(&self, surface_id: SurfaceId, session_id: SessionId) -> Result<(), SurfaceError> {
        let mut registry = self.registry();
        let surface = registry
            .surfaces
            .get_mut(&surface_id)
            .ok_or(SurfaceError::UnknownSurface(surface_id))?;

        if surface.state != SurfaceState::Active {
            return Err(SurfaceError::InvalidTransition {
                surface: surface_id,
                state: surface.state.as_str(),
                expected: SurfaceState::Active.as_str(),
            });
        }
        if let Some(owner) = surface.owner_session_id
            && owner != session_id
        {
            return Err(SurfaceError::NotOwner {
                surface: surface_id,
                owner: Some(owner),
                claimed: session_id,
            });
        }

        surface.owner_session_id = Some(session_id);
        debug!(surface = %surface_id, session = %session_id, "Surface bound");
        Ok(())
    }

    /// `Active -> PendingRelease`, when the owning session begins retiring.
    pub fn mark_pending_release(&self, surface_id: SurfaceId) -> Result<(), SurfaceError> {
        let mut registry = self.registry();
        let surface = registry
            .surfaces
            .get_mut(&surface_id)
            .ok_or(SurfaceError::UnknownSurface(surface_id))?;

        match surface.state {
            SurfaceState::Active => {
                surface.state = SurfaceState::PendingRelease;
                debug!(surface = %surface_id, "Surface pending release");
                Ok(())
            }
            SurfaceState::PendingRelease => Ok(()),
            SurfaceState::Released => Err(SurfaceError::InvalidTransition {
                surface: surface_id,
                state: surface.state.as_str(),
                expected: SurfaceState::Active.as_str(),
            }),
        }
    }

    /// `PendingRelease -> Released`, on the owning worker's word only. The
    /// backing resource is destroyed after the registry update.
    pub fn confirm_released(&self, receipt: TeardownReceipt) -> Result<ReleasedEvent, SurfaceError> {
        let surface = {
            let mut registry = self.registry();
            let surface = registry
                .surfaces
                .get(&receipt.surface_id)
                .ok_or(SurfaceError::UnknownSurface(receipt.surface_id))?;

            if surface.owner_session_id != Some(receipt.session_id) {
                return Err(SurfaceError::NotOwner {
                    surface: receipt.surface_id,
                    owner: surface.owner_session_id,
                    claimed: receipt.session_id,
                });
            }
            if surface.state != SurfaceState::PendingRelease {
                return Err(SurfaceError::InvalidTransition {
                    surface: receipt.surface_id,
                    state: surface.state.as_str(),
                    expected: SurfaceState::PendingRelease.as_str(),
                });
            }

            registry.released += 1;
            registry.surfaces.remove(&receipt.surface_id)
        };

        let Some(surface) = surface else {
            return Err(SurfaceError::UnknownSurface(receipt.surface_id));
        };
        self.provider.destroy(surface.native_handle);
        info!(
            surface = %surface.id,
            session = %receipt.session_id,
            handle = %surface.native_handle,
            "Surface released"
        );

        Ok(ReleasedEvent {
            surface_id: surface.id,
            native_handle: surface.native_handle,
            session_id: surface.owner_session_id,
        })
    }

    /// Release a surface that no session ever bound.
    pub fn discard(&self, surface_id: SurfaceId) -> Result<ReleasedEvent, SurfaceError> {
        let surface = {
            let mut registry = self.registry();
            match registry.surfaces.get(&surface_id) {
                None => return Err(SurfaceError::UnknownSurface(surface_id)),
                Some(surface) if surface.owner_session_id.is_some() => {
                    return Err(SurfaceError::InvalidTransition {
                        surface: surface_id,
                        state: "bound",
                        expected: "unbound",
                    });
                }
                Some(_) => {}
            }
            registry.released += 1;
            registry.surfaces.remove(&surface_id)
        };

        let Some(surface) = surface else {
            return Err(SurfaceError::UnknownSurface(surface_id));
        };
        self.provider.destroy(surface.native_handle);
        debug!(surface = %surface_id, "Unbound surface discarded");
        Ok(ReleasedEvent {
            surface_id,
            native_handle: surface.native_handle,
            session_id: None,
        })
    }

    pub fn get(&self, surface_id: SurfaceId) -> Option<Surface> {
        self.registry().surfaces.get(&surface_id).cloned()
    }

    pub fn native_handle(&self, surface_id: SurfaceId) -> Option<NativeHandle> {
        self.registry()
            .surfaces
            .get(&surface_id)
            .map(|surface| surface.native_handle)
    }

    /// Snapshot of all live (not yet released) surfaces, ordered by id.
    pub fn surfaces(&self) -> Vec<Surface> {
        let mut surfaces: Vec<_> = self.registry().surfaces.values().cloned().collect();
        surfaces.sort_by_key(|surface| surface.id);
        surfaces
    }

    pub fn stats(&self) -> BrokerStats {
        let registry = self.registry();
        let count = |state| {
            registry
                .surfaces
                .values()
                .filter(|surface| surface.state == state)
                .count()
        };
        BrokerStats {
            allocated: registry.allocated,
            released: registry.released,
            active: count(SurfaceState::Active),
            pending_release: count(SurfaceState::PendingRelease),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
