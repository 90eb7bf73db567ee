//! Deterministic in-memory stack.
//!
//! [`SimStack`] implements [`Stack`] without touching the host network.
//! The DHCP server, IPv6 duplicate address detection and throughput
//! clients are scripted from the outside through a shared [`SimNetwork`]
//! handle, which also records every stack call and the thread it ran on.
//!
//! # Example
//!
//! ```ignore
//! use netup::sim::{SimLease, SimNetwork, SimStack};
//!
//! let net = SimNetwork::new();
//! let mut manager = InterfaceManager::new(SimStack::new(net.clone()), ManagerConfig::default());
//! manager.init().await?;
//!
//! net.offer_lease(SimLease::new("10.0.0.5".parse()?, 24, Some("10.0.0.1".parse()?)));
//! ```

use std::collections::VecDeque;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::diagnostics::{LinkStats, StackStats};
use crate::error::{Error, Result};
use crate::stack::Stack;
use crate::status::{InterfaceStatus, Ipv4Settings, Ipv6AddrState, Ipv6Slot};
use crate::throughput::{ReportCallback, ReportKind, ThroughputReport};
use crate::util::addr::{link_local_from_id, link_local_from_mac};

/// Default MAC address of a simulated interface.
pub const DEFAULT_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

/// Size of one simulated DHCP frame.
const DHCP_FRAME_LEN: u64 = 342;

/// A stack call, as recorded by [`SimNetwork::ops`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOp {
    AddInterface,
    RemoveInterface,
    SetDefault,
    SetUp,
    SetDown,
    CreateIp6LinkLocal { preferred: bool },
    DhcpStart,
    DhcpStop,
    StartThroughputServer { port: u16 },
}

impl SimOp {
    fn same_kind(&self, other: &SimOp) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

/// A lease handed out by the simulated DHCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimLease {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Option<Ipv4Addr>,
}

impl SimLease {
    pub fn new(address: Ipv4Addr, prefix_len: u8, gateway: Option<Ipv4Addr>) -> Self {
        Self {
            address,
            prefix_len,
            gateway,
        }
    }

    fn settings(&self) -> Ipv4Settings {
        Ipv4Settings::new(self.address, self.prefix_len, self.gateway)
    }
}

#[derive(Debug, Clone)]
struct SimSession {
    remote: SocketAddr,
    bytes: u64,
    duration: Duration,
    kind: ReportKind,
}

#[derive(Debug, Default)]
struct Script {
    lease: Option<SimLease>,
    link_local_id: Option<u64>,
    dad_polls: u32,
    failures: Vec<SimOp>,
    sessions: VecDeque<SimSession>,
    ops: Vec<(SimOp, Option<String>)>,
}

/// Shared control handle for one or more [`SimStack`]s.
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    inner: Arc<Mutex<Script>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the DHCP server offer `lease`. A running client picks it up on
    /// the next poll, replacing any previous lease.
    pub fn offer_lease(&self, lease: SimLease) {
        self.lock().lease = Some(lease);
    }

    /// Withdraw the current lease. A running client loses its address.
    pub fn withdraw_lease(&self) {
        self.lock().lease = None;
    }

    /// Derive link-local addresses from `id` (`fe80::<id>`) instead of the
    /// MAC address.
    pub fn set_link_local_id(&self, id: u64) {
        self.lock().link_local_id = Some(id);
    }

    /// Number of polls a non-preferred address stays tentative.
    pub fn set_dad_polls(&self, polls: u32) {
        self.lock().dad_polls = polls;
    }

    /// Make the next call of the same kind as `op` fail.
    pub fn fail_next(&self, op: SimOp) {
        self.lock().failures.push(op);
    }

    /// Queue a throughput session, reported on the next poll once the
    /// server is listening and the interface holds an IPv4 address.
    pub fn complete_session(&self, remote: SocketAddr, bytes: u64, duration: Duration) {
        self.lock().sessions.push_back(SimSession {
            remote,
            bytes,
            duration,
            kind: ReportKind::TcpDoneServer,
        });
    }

    /// Calls made so far, in order.
    pub fn ops(&self) -> Vec<SimOp> {
        self.lock().ops.iter().map(|(op, _)| *op).collect()
    }

    /// Name of the thread each call ran on, in call order.
    pub fn op_threads(&self) -> Vec<Option<String>> {
        self.lock().ops.iter().map(|(_, name)| name.clone()).collect()
    }

    /// Forget the recorded calls.
    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Record `op` and consume a pending failure for it, if any.
    fn record(&self, op: SimOp) -> Result<()> {
        let mut script = self.lock();
        let name = thread::current().name().map(str::to_string);
        script.ops.push((op, name));
        trace!(?op, "sim call");

        match script.failures.iter().position(|f| f.same_kind(&op)) {
            Some(idx) => {
                script.failures.remove(idx);
                Err(Error::Io(std::io::Error::other("injected failure")))
            }
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct SimInterface {
    status: InterfaceStatus,
    dhcp_running: bool,
    dad_remaining: u32,
}

/// In-memory [`Stack`] driven by a [`SimNetwork`].
pub struct SimStack {
    net: SimNetwork,
    mac: [u8; 6],
    iface: Option<SimInterface>,
    throughput: Option<(u16, ReportCallback)>,
    stats: StackStats,
}

impl SimStack {
    pub fn new(net: SimNetwork) -> Self {
        Self {
            net,
            mac: DEFAULT_MAC,
            iface: None,
            throughput: None,
            stats: StackStats::default(),
        }
    }

    /// Use a different MAC address.
    pub fn with_mac(mut self, mac: [u8; 6]) -> Self {
        self.mac = mac;
        self
    }

    fn iface(&mut self) -> Result<&mut SimInterface> {
        self.iface.as_mut().ok_or(Error::NotAttached)
    }

    fn exchange(link: &mut LinkStats, frames: u64) {
        link.tx_frames += frames;
        link.rx_frames += frames;
        link.tx_bytes += frames * DHCP_FRAME_LEN;
        link.rx_bytes += frames * DHCP_FRAME_LEN;
    }

    fn poll_dhcp(&mut self) {
        let lease = self.net.lock().lease;
        let Some(iface) = self.iface.as_mut() else {
            return;
        };
        if !iface.dhcp_running || !iface.status.up {
            return;
        }

        match lease {
            Some(lease) if iface.status.ipv4 != lease.settings() => {
                iface.status.ipv4 = lease.settings();
                self.stats.dhcp.leases += 1;
                // DISCOVER/OFFER, REQUEST/ACK
                Self::exchange(&mut self.stats.link, 2);
                debug!(address = %lease.address, "sim lease applied");
            }
            None if iface.status.ipv4.is_assigned() => {
                iface.status.ipv4 = Ipv4Settings::UNSPECIFIED;
                self.stats.dhcp.lease_losses += 1;
                debug!("sim lease lost");
            }
            _ => {}
        }
    }

    fn poll_dad(&mut self) {
        let Some(iface) = self.iface.as_mut() else {
            return;
        };
        let slot = &mut iface.status.ipv6[0];
        if slot.state != Ipv6AddrState::Tentative {
            return;
        }
        if iface.dad_remaining == 0 {
            slot.state = Ipv6AddrState::Preferred;
        } else {
            iface.dad_remaining -= 1;
        }
    }

    fn poll_sessions(&mut self) {
        let Some(local) = self
            .iface
            .as_ref()
            .filter(|iface| iface.status.up)
            .map(|iface| iface.status.ipv4.address)
            .filter(|addr| !addr.is_unspecified())
        else {
            return;
        };
        let Some((port, callback)) = self.throughput.as_mut() else {
            return;
        };

        let sessions: Vec<SimSession> = self.net.lock().sessions.drain(..).collect();
        for session in sessions {
            let report = ThroughputReport {
                kind: session.kind,
                local: SocketAddr::V4(SocketAddrV4::new(local, *port)),
                remote: session.remote,
                bytes: session.bytes,
                duration: session.duration,
            };
            callback(&report);
            self.stats.throughput_sessions += 1;
        }
    }

    fn pending(&self) -> bool {
        let script = self.net.lock();
        let Some(iface) = self.iface.as_ref() else {
            return false;
        };
        let dhcp = iface.dhcp_running
            && iface.status.up
            && match script.lease {
                Some(lease) => iface.status.ipv4 != lease.settings(),
                None => iface.status.ipv4.is_assigned(),
            };
        let dad = iface.status.ipv6[0].state == Ipv6AddrState::Tentative;
        let sessions = self.throughput.is_some() && !script.sessions.is_empty();
        dhcp || dad || sessions
    }
}

impl Stack for SimStack {
    fn add_interface(&mut self) -> Result<()> {
        self.net.record(SimOp::AddInterface)?;
        if self.iface.is_some() {
            return Err(Error::AlreadyAttached);
        }
        self.iface = Some(SimInterface {
            status: InterfaceStatus::new(self.mac),
            dhcp_running: false,
            dad_remaining: 0,
        });
        self.stats.interfaces_added += 1;
        Ok(())
    }

    fn remove_interface(&mut self) -> Result<()> {
        self.net.record(SimOp::RemoveInterface)?;
        self.iface.take().ok_or(Error::NotAttached)?;
        self.stats.interfaces_removed += 1;
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.iface.is_some()
    }

    fn set_default(&mut self) -> Result<()> {
        self.net.record(SimOp::SetDefault)?;
        self.iface()?.status.default = true;
        Ok(())
    }

    fn set_up(&mut self) -> Result<()> {
        self.net.record(SimOp::SetUp)?;
        self.iface()?.status.up = true;
        Ok(())
    }

    fn set_down(&mut self) -> Result<()> {
        self.net.record(SimOp::SetDown)?;
        self.iface()?.status.up = false;
        Ok(())
    }

    fn create_ip6_linklocal(&mut self, preferred: bool) -> Result<()> {
        self.net.record(SimOp::CreateIp6LinkLocal { preferred })?;
        let (id, dad_polls) = {
            let script = self.net.lock();
            (script.link_local_id, script.dad_polls)
        };
        let address = match id {
            Some(id) => link_local_from_id(id),
            None => link_local_from_mac(self.mac),
        };

        let iface = self.iface()?;
        let state = if preferred {
            Ipv6AddrState::Preferred
        } else {
            iface.dad_remaining = dad_polls;
            Ipv6AddrState::Tentative
        };
        iface.status.ipv6[0] = Ipv6Slot::new(address, state);
        Ok(())
    }

    fn dhcp_start(&mut self) -> Result<()> {
        self.net.record(SimOp::DhcpStart)?;
        self.iface()?.dhcp_running = true;
        self.stats.dhcp.starts += 1;
        Ok(())
    }

    fn dhcp_stop(&mut self) -> Result<()> {
        self.net.record(SimOp::DhcpStop)?;
        let iface = self.iface()?;
        iface.dhcp_running = false;
        iface.status.ipv4 = Ipv4Settings::UNSPECIFIED;
        self.stats.dhcp.stops += 1;
        Ok(())
    }

    fn start_throughput_server(&mut self, port: u16, report: ReportCallback) -> Result<()> {
        self.net.record(SimOp::StartThroughputServer { port })?;
        if self.throughput.is_some() {
            return Err(Error::stack(
                "start_throughput_server",
                "server already listening",
            ));
        }
        self.throughput = Some((port, report));
        Ok(())
    }

    fn poll(&mut self, _now: Instant) {
        self.poll_dhcp();
        self.poll_dad();
        self.poll_sessions();
    }

    fn poll_delay(&mut self, _now: Instant) -> Option<Duration> {
        self.pending().then_some(Duration::ZERO)
    }

    fn status(&self) -> Option<InterfaceStatus> {
        self.iface.as_ref().map(|iface| iface.status.clone())
    }

    fn stats(&self) -> StackStats {
        let mut stats = self.stats.clone();
        stats.sockets = usize::from(self.throughput.is_some())
            + usize::from(self.iface.as_ref().is_some_and(|iface| iface.dhcp_running));
        stats
    }
}
