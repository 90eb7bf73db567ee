//! The protocol stack boundary.
//!
//! A [`Stack`] is the packet-processing engine: it owns the single
//! interface, its link-layer device, the DHCP client and any embedded
//! services. Every method is thread-confined: the engine worker moves the
//! stack onto its own thread and only calls it from there, so
//! implementations need no internal locking.
//!
//! Two implementations ship with the crate:
//!
//! - `SmolStack` (feature `tap`) runs smoltcp over a Linux TAP device.
//! - `SimStack` (feature `sim`) is an in-memory stack with a scripted DHCP
//!   server, used by the tests and the `netup sim` command.

use std::time::{Duration, Instant};

use crate::diagnostics::StackStats;
use crate::error::Result;
use crate::status::InterfaceStatus;
use crate::throughput::ReportCallback;

/// Operations the lifecycle needs from a protocol stack.
pub trait Stack: Send + 'static {
    /// Create the interface with no address, netmask or gateway and attach
    /// the link-layer device to it. The interface starts down.
    ///
    /// Fails with [`Error::AlreadyAttached`](crate::Error::AlreadyAttached)
    /// if an interface exists.
    fn add_interface(&mut self) -> Result<()>;

    /// Detach and destroy the interface, releasing all driver state it owns.
    fn remove_interface(&mut self) -> Result<()>;

    /// Check if an interface is attached.
    fn is_attached(&self) -> bool;

    /// Make the interface the default route.
    fn set_default(&mut self) -> Result<()>;

    /// Bring the interface administratively up.
    fn set_up(&mut self) -> Result<()>;

    /// Bring the interface administratively down.
    fn set_down(&mut self) -> Result<()>;

    /// Generate the IPv6 link-local address into slot 0.
    ///
    /// With `preferred` set the address is usable immediately, without
    /// waiting for duplicate address detection.
    fn create_ip6_linklocal(&mut self, preferred: bool) -> Result<()>;

    /// Start the DHCPv4 client on the interface.
    fn dhcp_start(&mut self) -> Result<()>;

    /// Stop the DHCPv4 client and release the IPv4 configuration.
    fn dhcp_stop(&mut self) -> Result<()>;

    /// Start the embedded throughput-test server.
    fn start_throughput_server(&mut self, port: u16, report: ReportCallback) -> Result<()>;

    /// Process pending I/O and timers.
    fn poll(&mut self, now: Instant);

    /// How long the stack can sleep before it needs polling again.
    ///
    /// `None` means no timer is pending; the engine falls back to its idle
    /// poll interval.
    fn poll_delay(&mut self, now: Instant) -> Option<Duration>;

    /// Snapshot of the interface, `None` when detached.
    fn status(&self) -> Option<InterfaceStatus>;

    /// Protocol statistics.
    fn stats(&self) -> StackStats;
}
