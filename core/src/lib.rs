pub mod anchor;
pub mod arbitration;
pub mod change;
pub mod config;
pub mod coordinator;
pub mod environment;
pub mod error;
pub mod guard;
pub mod headless;
pub mod layer;
pub mod ports;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod timer;

#[cfg(test)]
mod coordinator_tests;

// Re-exports for convenience
pub use anchor::{AnchorResolver, HostTree, NodeRole, TreeAnchorResolver};
pub use config::{CoordinatorConfig, default_config_path, load_config, load_or_default};
pub use coordinator::{Coordinator, Ports, ViewSnapshot};
pub use error::{ConfigError, HostError, LayerError};
pub use ports::{
    Bounds, DisplayPredicateEvaluator, EffectId, EffectResolver, HostHandle, RendererFactory,
    RendererHandle, SurfaceHost, SurfaceId, ViewKey,
};
pub use service::{CoordinatorCommand, CoordinatorHandle, spawn_coordinator};
pub use timer::{TimerHandle, TimerPort, VirtualTimer};
