//! Common test utilities for integration tests.
//!
//! Provides `Harness`, an `InterfaceManager` over a `SimStack` with a
//! handle to the simulated network and an address event subscription.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::time::Duration;

use netup::sim::{SimLease, SimNetwork, SimStack};
use netup::{AddressEvent, EngineConfig, InterfaceManager, ManagerConfig};
use tokio::sync::broadcast;

/// Name of the engine worker thread in tests.
pub const ENGINE_THREAD: &str = "netup-test-engine";

/// How long to wait for an expected event.
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the engine gets to converge before checking for silence.
const SETTLE_TIME: Duration = Duration::from_millis(50);

/// A manager over a simulated stack.
pub struct Harness {
    pub net: SimNetwork,
    pub manager: InterfaceManager<SimStack>,
    pub events: broadcast::Receiver<AddressEvent>,
}

impl Harness {
    /// Harness with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    /// Harness with `config`; the engine settings are overridden for tests.
    pub fn with_config(config: ManagerConfig) -> Self {
        let config = config.engine(
            EngineConfig::new()
                .idle_poll(Duration::from_millis(1))
                .thread_name(ENGINE_THREAD),
        );
        let net = SimNetwork::new();
        let manager = InterfaceManager::new(SimStack::new(net.clone()), config);
        let events = manager.subscribe();
        Self {
            net,
            manager,
            events,
        }
    }

    /// Wait for the next address event.
    pub async fn next_event(&mut self) -> AddressEvent {
        match tokio::time::timeout(EVENT_TIMEOUT, self.events.recv()).await {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => panic!("event channel failed: {}", e),
            Err(_) => panic!("no address event within {:?}", EVENT_TIMEOUT),
        }
    }

    /// Wait for `n` address events and return their report lines, sorted.
    pub async fn next_lines(&mut self, n: usize) -> Vec<String> {
        let mut lines = Vec::with_capacity(n);
        for _ in 0..n {
            lines.push(self.next_event().await.to_string());
        }
        lines.sort();
        lines
    }

    /// Give the engine time to converge.
    pub async fn settle(&self) {
        tokio::time::sleep(SETTLE_TIME).await;
    }

    /// Let the engine converge and check nothing new was reported.
    pub async fn assert_quiet(&mut self) {
        self.settle().await;
        if let Ok(event) = self.events.try_recv() {
            panic!("unexpected address event: {}", event);
        }
    }

    /// Check that every stack call so far ran on the engine thread.
    pub fn assert_engine_thread_only(&self) {
        for name in self.net.op_threads() {
            assert_eq!(name.as_deref(), Some(ENGINE_THREAD));
        }
    }
}

/// A `10.0.0.<last>/24` lease with gateway `10.0.0.1`.
pub fn lease(last: u8) -> SimLease {
    SimLease::new(
        Ipv4Addr::new(10, 0, 0, last),
        24,
        Some(Ipv4Addr::new(10, 0, 0, 1)),
    )
}
