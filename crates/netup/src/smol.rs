//! smoltcp-backed protocol stack.
//!
//! [`SmolStack`] drives a smoltcp [`Interface`] over a [`LinkDriver`]. The
//! socket set outlives the interface, so the throughput server keeps
//! listening across reinitialization; the DHCP socket belongs to the
//! interface and is dropped with it.
//!
//! smoltcp performs no duplicate address detection. Link-local addresses
//! are usable as soon as they are added and always report as preferred.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use smoltcp::iface::{Config, Interface, SocketHandle, SocketSet};
use smoltcp::socket::{dhcpv4, tcp};
use smoltcp::wire::{
    EthernetAddress, HardwareAddress, IpCidr, IpEndpoint, Ipv4Address, Ipv4Cidr, Ipv6Address,
};
use tracing::{debug, info, warn};

use crate::diagnostics::{LinkStats, StackStats};
use crate::error::{Error, Result};
use crate::stack::Stack;
use crate::status::{InterfaceStatus, Ipv4Settings, Ipv6AddrState, Ipv6Slot};
use crate::throughput::{ReportCallback, ReportKind, ThroughputReport};
use crate::util::addr::link_local_from_mac;

/// Link-local prefix length.
const LINK_LOCAL_PREFIX: u8 = 64;

/// Receive window of the throughput server.
const THROUGHPUT_RX_BUFFER: usize = 64 * 1024;
const THROUGHPUT_TX_BUFFER: usize = 1024;

/// The link-layer driver: opens a device each time the interface is added.
pub trait LinkDriver: Send + 'static {
    /// The device handed to smoltcp.
    type Device: smoltcp::phy::Device + Send;

    /// Open the device for a new interface.
    fn init(&mut self) -> Result<Self::Device>;

    /// MAC address of the device.
    fn hardware_addr(&self) -> [u8; 6];

    /// Frame counters, cumulative over all devices opened.
    fn link_stats(&self) -> LinkStats;
}

struct Attached<D> {
    iface: Interface,
    device: D,
    dhcp: Option<SocketHandle>,
    gateway: Option<Ipv4Address>,
    up: bool,
    default: bool,
}

impl<D> Attached<D> {
    fn apply_lease(&mut self, address: Ipv4Cidr, router: Option<Ipv4Address>) -> Result<()> {
        let mut full = false;
        self.iface.update_ip_addrs(|addrs| {
            addrs.retain(|cidr| !matches!(cidr, IpCidr::Ipv4(_)));
            full = addrs.push(IpCidr::Ipv4(address)).is_err();
        });
        if full {
            return Err(Error::stack("dhcp", "address table full"));
        }
        self.gateway = router;
        self.sync_default_route();
        Ok(())
    }

    fn clear_lease(&mut self) {
        self.iface
            .update_ip_addrs(|addrs| addrs.retain(|cidr| !matches!(cidr, IpCidr::Ipv4(_))));
        self.gateway = None;
        self.iface.routes_mut().remove_default_ipv4_route();
    }

    fn sync_default_route(&mut self) {
        match self.gateway {
            Some(gateway) if self.default => {
                if self.iface.routes_mut().add_default_ipv4_route(gateway).is_err() {
                    warn!("route table full, default route not set");
                }
            }
            _ => {
                self.iface.routes_mut().remove_default_ipv4_route();
            }
        }
    }
}

struct Session {
    local: SocketAddr,
    remote: SocketAddr,
    started: Instant,
    bytes: u64,
}

struct ThroughputServer {
    handle: SocketHandle,
    port: u16,
    report: ReportCallback,
    session: Option<Session>,
}

/// [`Stack`] implementation on smoltcp.
pub struct SmolStack<L: LinkDriver> {
    driver: L,
    sockets: SocketSet<'static>,
    attached: Option<Attached<L::Device>>,
    throughput: Option<ThroughputServer>,
    epoch: Instant,
    stats: StackStats,
}

impl<L: LinkDriver> SmolStack<L> {
    pub fn new(driver: L) -> Self {
        Self {
            driver,
            sockets: SocketSet::new(Vec::new()),
            attached: None,
            throughput: None,
            epoch: Instant::now(),
            stats: StackStats::default(),
        }
    }

    /// The link-layer driver.
    pub fn driver(&self) -> &L {
        &self.driver
    }

    fn timestamp(&self, now: Instant) -> smoltcp::time::Instant {
        let micros = now.saturating_duration_since(self.epoch).as_micros();
        smoltcp::time::Instant::from_micros(i64::try_from(micros).unwrap_or(i64::MAX))
    }

    fn attached(&mut self) -> Result<&mut Attached<L::Device>> {
        self.attached.as_mut().ok_or(Error::NotAttached)
    }

    fn poll_dhcp(&mut self) {
        let Some(attached) = self.attached.as_mut() else {
            return;
        };
        let Some(handle) = attached.dhcp else {
            return;
        };

        let (address, router) = match self.sockets.get_mut::<dhcpv4::Socket>(handle).poll() {
            Some(dhcpv4::Event::Configured(config)) => (config.address, config.router),
            Some(dhcpv4::Event::Deconfigured) => {
                attached.clear_lease();
                self.stats.dhcp.lease_losses += 1;
                info!("dhcp lease lost");
                return;
            }
            None => return,
        };

        match attached.apply_lease(address, router) {
            Ok(()) => {
                self.stats.dhcp.leases += 1;
                debug!(address = %address, "dhcp lease applied");
            }
            Err(e) => warn!(error = %e, "dhcp lease not applied"),
        }
    }

    fn poll_throughput(&mut self, now: Instant) {
        let Some(server) = self.throughput.as_mut() else {
            return;
        };
        let socket = self.sockets.get_mut::<tcp::Socket>(server.handle);

        // LastAck after our close is still active but belongs to the
        // session already reported.
        if server.session.is_none()
            && matches!(
                socket.state(),
                tcp::State::SynReceived | tcp::State::Established | tcp::State::CloseWait
            )
            && let (Some(local), Some(remote)) = (socket.local_endpoint(), socket.remote_endpoint())
        {
            debug!(remote = %remote, "throughput session started");
            server.session = Some(Session {
                local: socket_addr(local),
                remote: socket_addr(remote),
                started: now,
                bytes: 0,
            });
        }

        if let Some(session) = server.session.as_mut() {
            while socket.can_recv() {
                match socket.recv(|buf| (buf.len(), buf.len())) {
                    Ok(len) => session.bytes += len as u64,
                    Err(_) => break,
                }
            }

            let kind = if socket.state() == tcp::State::CloseWait {
                socket.close();
                Some(ReportKind::TcpDoneServer)
            } else if !socket.is_active() {
                Some(ReportKind::TcpAbortedRemote)
            } else {
                None
            };

            if let Some(kind) = kind
                && let Some(session) = server.session.take()
            {
                let report = ThroughputReport {
                    kind,
                    local: session.local,
                    remote: session.remote,
                    bytes: session.bytes,
                    duration: now.saturating_duration_since(session.started),
                };
                (server.report)(&report);
                self.stats.throughput_sessions += 1;
            }
        }

        if !socket.is_open()
            && let Err(e) = socket.listen(server.port)
        {
            warn!(port = server.port, error = ?e, "throughput server could not re-listen");
        }
    }
}

fn socket_addr(endpoint: IpEndpoint) -> SocketAddr {
    SocketAddr::new(IpAddr::from(endpoint.addr), endpoint.port)
}

impl<L: LinkDriver> Stack for SmolStack<L> {
    fn add_interface(&mut self) -> Result<()> {
        if self.attached.is_some() {
            return Err(Error::AlreadyAttached);
        }
        let mut device = self.driver.init()?;

        let mac = EthernetAddress(self.driver.hardware_addr());
        let config = Config::new(HardwareAddress::Ethernet(mac));
        let iface = Interface::new(config, &mut device, self.timestamp(Instant::now()));

        self.attached = Some(Attached {
            iface,
            device,
            dhcp: None,
            gateway: None,
            up: false,
            default: false,
        });
        self.stats.interfaces_added += 1;
        Ok(())
    }

    fn remove_interface(&mut self) -> Result<()> {
        let attached = self.attached.take().ok_or(Error::NotAttached)?;
        if let Some(handle) = attached.dhcp {
            self.sockets.remove(handle);
        }
        // Dropping the device closes it.
        drop(attached);
        self.stats.interfaces_removed += 1;
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    fn set_default(&mut self) -> Result<()> {
        let attached = self.attached()?;
        attached.default = true;
        attached.sync_default_route();
        Ok(())
    }

    fn set_up(&mut self) -> Result<()> {
        self.attached()?.up = true;
        Ok(())
    }

    fn set_down(&mut self) -> Result<()> {
        self.attached()?.up = false;
        Ok(())
    }

    fn create_ip6_linklocal(&mut self, preferred: bool) -> Result<()> {
        let address = Ipv6Address::from(link_local_from_mac(self.driver.hardware_addr()));
        let cidr = IpCidr::new(address.into(), LINK_LOCAL_PREFIX);
        if !preferred {
            debug!("no duplicate address detection, link-local usable immediately");
        }

        let attached = self.attached()?;
        let mut full = false;
        attached.iface.update_ip_addrs(|addrs| {
            if !addrs.contains(&cidr) {
                full = addrs.push(cidr).is_err();
            }
        });
        if full {
            return Err(Error::stack(
                "create_ip6_linklocal",
                "address table full",
            ));
        }
        Ok(())
    }

    fn dhcp_start(&mut self) -> Result<()> {
        let attached = self.attached.as_mut().ok_or(Error::NotAttached)?;
        if attached.dhcp.is_none() {
            attached.dhcp = Some(self.sockets.add(dhcpv4::Socket::new()));
            self.stats.dhcp.starts += 1;
        }
        Ok(())
    }

    fn dhcp_stop(&mut self) -> Result<()> {
        let attached = self.attached.as_mut().ok_or(Error::NotAttached)?;
        if let Some(handle) = attached.dhcp.take() {
            self.sockets.remove(handle);
            attached.clear_lease();
            self.stats.dhcp.stops += 1;
        }
        Ok(())
    }

    fn start_throughput_server(&mut self, port: u16, report: ReportCallback) -> Result<()> {
        if self.throughput.is_some() {
            return Err(Error::stack(
                "start_throughput_server",
                "server already listening",
            ));
        }

        let mut socket = tcp::Socket::new(
            tcp::SocketBuffer::new(vec![0; THROUGHPUT_RX_BUFFER]),
            tcp::SocketBuffer::new(vec![0; THROUGHPUT_TX_BUFFER]),
        );
        socket
            .listen(port)
            .map_err(|e| Error::stack("start_throughput_server", format!("{:?}", e)))?;

        self.throughput = Some(ThroughputServer {
            handle: self.sockets.add(socket),
            port,
            report,
            session: None,
        });
        Ok(())
    }

    fn poll(&mut self, now: Instant) {
        let timestamp = self.timestamp(now);
        let Some(attached) = self.attached.as_mut().filter(|attached| attached.up) else {
            return;
        };
        attached
            .iface
            .poll(timestamp, &mut attached.device, &mut self.sockets);

        self.poll_dhcp();
        self.poll_throughput(now);
    }

    fn poll_delay(&mut self, now: Instant) -> Option<Duration> {
        let timestamp = self.timestamp(now);
        let attached = self.attached.as_mut().filter(|attached| attached.up)?;
        attached
            .iface
            .poll_delay(timestamp, &self.sockets)
            .map(|delay| Duration::from_micros(delay.total_micros()))
    }

    fn status(&self) -> Option<InterfaceStatus> {
        let attached = self.attached.as_ref()?;
        let mut status = InterfaceStatus::new(self.driver.hardware_addr());
        status.up = attached.up;
        status.default = attached.default;

        for cidr in attached.iface.ip_addrs() {
            match cidr {
                IpCidr::Ipv4(cidr) => {
                    status.ipv4 = Ipv4Settings::new(
                        Ipv4Addr::from(cidr.address()),
                        cidr.prefix_len(),
                        attached.gateway.map(Ipv4Addr::from),
                    );
                }
                IpCidr::Ipv6(cidr) => {
                    if let Some(slot) = status.free_ipv6_slot() {
                        status.ipv6[slot] = Ipv6Slot::new(
                            Ipv6Addr::from(cidr.address()),
                            Ipv6AddrState::Preferred,
                        );
                    }
                }
            }
        }
        Some(status)
    }

    fn stats(&self) -> StackStats {
        let mut stats = self.stats.clone();
        stats.link = self.driver.link_stats();
        stats.sockets = self.sockets.iter().count();
        stats
    }
}
