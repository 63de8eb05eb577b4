pub mod broker;
pub mod provider;

pub use broker::{
    BrokerStats, ReleasedEvent, Surface, SurfaceBroker, SurfaceState, TeardownReceipt,
};
pub use provider::{HeadlessSurfaceProvider, SurfaceProvider};
