//! Address-assignment observer.
//!
//! The engine invokes [`StatusObserver::on_status_changed`] on its worker
//! thread every time the interface changes. The observer reports the first
//! IPv4 assignment and the first time each IPv6 slot becomes preferred,
//! once per lifecycle epoch, no matter how often the callback fires while
//! DHCP and autoconfiguration converge.
//!
//! Reports are logged and published as [`AddressEvent`]s on a broadcast
//! channel, so subscribers do their work off the engine thread.
//!
//! # Example
//!
//! ```ignore
//! use tokio_stream::StreamExt;
//!
//! let mut events = manager.events();
//! while let Some(event) = events.next().await {
//!     println!("{}", event);
//! }
//! ```

use std::fmt;
use std::net::Ipv6Addr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::task::{Context, Poll};

use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info};

use crate::engine::StatusCallback;
use crate::status::{InterfaceStatus, Ipv4Settings};

/// An address reported for the first time in the current epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum AddressEvent {
    /// An IPv4 address was assigned.
    Ipv4Assigned(Ipv4Settings),
    /// An IPv6 slot reached the preferred state.
    Ipv6Preferred {
        /// Slot index.
        slot: usize,
        /// The address in that slot.
        address: Ipv6Addr,
    },
}

impl fmt::Display for AddressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4Assigned(settings) => write!(
                f,
                "ip4_addr: {} netmask: {} gw: {}",
                settings.address, settings.netmask, settings.gateway
            ),
            Self::Ipv6Preferred { slot, address } => write!(f, "ip6_addr[{}]: {}", slot, address),
        }
    }
}

/// Which addresses were already reported in this epoch.
///
/// Written only by the engine thread; atomics keep reads from other
/// threads well-defined.
#[derive(Debug, Default)]
pub struct AddressTracker {
    ipv4: AtomicBool,
    ipv6: AtomicU32,
}

impl AddressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the IPv4 address was reported.
    pub fn ipv4_reported(&self) -> bool {
        self.ipv4.load(Ordering::Acquire)
    }

    /// Check if the given IPv6 slot was reported.
    pub fn ipv6_reported(&self, slot: usize) -> bool {
        slot < 32 && self.ipv6.load(Ordering::Acquire) & (1 << slot) != 0
    }

    /// Bitset of reported IPv6 slots.
    pub fn ipv6_bits(&self) -> u32 {
        self.ipv6.load(Ordering::Acquire)
    }

    fn mark_ipv4(&self) {
        self.ipv4.store(true, Ordering::Release);
    }

    fn mark_ipv6(&self, slot: usize) {
        self.ipv6.fetch_or(1 << slot, Ordering::AcqRel);
    }

    /// Forget everything reported. Starts a new epoch.
    pub fn reset(&self) {
        self.ipv4.store(false, Ordering::Release);
        self.ipv6.store(0, Ordering::Release);
    }
}

/// Deduplicating status observer.
///
/// Clones share the tracker and the channel.
#[derive(Debug, Clone)]
pub struct StatusObserver {
    tracker: Arc<AddressTracker>,
    events: broadcast::Sender<AddressEvent>,
}

impl StatusObserver {
    /// Create an observer whose event channel buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            tracker: Arc::new(AddressTracker::new()),
            events,
        }
    }

    /// The shared tracker.
    pub fn tracker(&self) -> &AddressTracker {
        &self.tracker
    }

    /// Subscribe to address events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AddressEvent> {
        self.events.subscribe()
    }

    /// Address events as a stream.
    pub fn events(&self) -> AddressEventStream {
        AddressEventStream {
            inner: BroadcastStream::new(self.subscribe()),
        }
    }

    /// Report newly assigned addresses in `status`.
    ///
    /// Returns the events reported by this call, empty if nothing new.
    pub fn on_status_changed(&self, status: &InterfaceStatus) -> Vec<AddressEvent> {
        let mut reported = Vec::new();

        if !self.tracker.ipv4_reported() && status.ipv4.is_assigned() {
            self.tracker.mark_ipv4();
            reported.push(AddressEvent::Ipv4Assigned(status.ipv4));
        }

        for (slot, address) in status.preferred_ipv6() {
            if !self.tracker.ipv6_reported(slot) {
                self.tracker.mark_ipv6(slot);
                reported.push(AddressEvent::Ipv6Preferred { slot, address });
            }
        }

        for event in &reported {
            info!("{}", event);
            // No subscribers is fine.
            let _ = self.events.send(*event);
        }
        reported
    }

    /// Start a new epoch.
    pub fn reset(&self) {
        debug!("address tracker reset");
        self.tracker.reset();
    }

    /// Wrap a clone of the observer as an engine status callback.
    pub fn to_callback(&self) -> StatusCallback {
        let observer = self.clone();
        Box::new(move |status| {
            observer.on_status_changed(status);
        })
    }
}

/// Stream of [`AddressEvent`]s.
///
/// Events missed because the receiver lagged are skipped.
pub struct AddressEventStream {
    inner: BroadcastStream<AddressEvent>,
}

impl Stream for AddressEventStream {
    type Item = AddressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                    debug!(missed, "address event stream lagged");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
