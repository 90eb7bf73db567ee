//! Interface manager configuration.

use std::time::Duration;

use crate::engine::EngineConfig;
use crate::throughput::ThroughputConfig;

/// Default capacity of the address event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration for [`InterfaceManager`](crate::InterfaceManager).
///
/// # Example
///
/// ```ignore
/// use netup::{ManagerConfig, ThroughputConfig};
///
/// let config = ManagerConfig::new()
///     .throughput(ThroughputConfig::default())
///     .event_capacity(16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Mark the link-local address preferred immediately instead of
    /// waiting for duplicate address detection (default: true).
    pub link_local_preferred: bool,
    /// Start the throughput server after init (default: disabled).
    pub throughput: Option<ThroughputConfig>,
    /// Engine worker settings.
    pub engine: EngineConfig,
    /// Address events buffered per subscriber (default: 64).
    pub event_capacity: usize,
}

impl ManagerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the link-local preferred policy.
    pub fn link_local_preferred(mut self, preferred: bool) -> Self {
        self.link_local_preferred = preferred;
        self
    }

    /// Enable the throughput server.
    pub fn throughput(mut self, config: ThroughputConfig) -> Self {
        self.throughput = Some(config);
        self
    }

    /// Set the engine configuration.
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set the engine idle poll interval.
    pub fn idle_poll(mut self, interval: Duration) -> Self {
        self.engine.idle_poll = interval;
        self
    }

    /// Set the address event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            link_local_preferred: true,
            throughput: None,
            engine: EngineConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
