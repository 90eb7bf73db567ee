//! Single-interface network bring-up on an embedded TCP/IP stack.
//!
//! This crate manages exactly one network interface on top of a protocol
//! stack that runs on its own worker thread. It waits for the stack to come
//! up, attaches the link-layer device, starts the DHCPv4 client and IPv6
//! link-local addressing, reports addresses as they are assigned, and can
//! tear the interface down and rebuild it without restarting the process.
//!
//! # Features
//!
//! - `tap` - smoltcp-backed stack over a Linux TAP device
//! - `sim` - deterministic in-memory stack for tests and demos
//! - `serde` - `Serialize` for statistics, status and events
//! - `full` - All features enabled
//!
//! # Example
//!
//! ```ignore
//! use netup::{InterfaceManager, ManagerConfig};
//! use netup::smol::SmolStack;
//! use netup::tap::{TapConfig, TapDriver};
//!
//! #[tokio::main]
//! async fn main() -> netup::Result<()> {
//!     let driver = TapDriver::new(TapConfig::new("tap0"))?;
//!     let mut manager = InterfaceManager::new(SmolStack::new(driver), ManagerConfig::default());
//!
//!     // Blocks until the engine thread runs, then brings the interface up.
//!     manager.init().await?;
//!
//!     let mut events = manager.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Threading
//!
//! The stack is moved onto the engine worker thread at `init` and never
//! leaves it. Every interface mutation is queued onto that thread through
//! [`Engine::call`](engine::Engine::call); the status observer runs there
//! too and hands its reports to subscribers through a broadcast channel.

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod observer;
pub mod stack;
pub mod status;
pub mod throughput;
pub mod util;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(feature = "tap")]
pub mod smol;

#[cfg(feature = "tap")]
pub mod tap;

pub use config::ManagerConfig;
pub use diagnostics::Diagnostics;
pub use engine::{Engine, EngineConfig, StartupGate, start_engine_and_wait};
pub use error::{Error, Result};
pub use lifecycle::{AttachedInterface, InterfaceManager, InterfaceSetup, LifecycleState};
pub use observer::{AddressEvent, AddressTracker, StatusObserver};
pub use stack::Stack;
pub use status::{InterfaceStatus, Ipv4Settings, Ipv6AddrState, Ipv6Slot};
pub use throughput::{ThroughputConfig, ThroughputProbe, ThroughputReport};
