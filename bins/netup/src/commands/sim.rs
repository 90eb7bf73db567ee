//! netup sim - run the interface lifecycle against a simulated network.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Args;
use netup::sim::{SimLease, SimNetwork, SimStack};
use netup::util::parse_ipv4_prefix;
use netup::{EngineConfig, InterfaceManager, ManagerConfig, ThroughputConfig};
use tracing::info;

use super::{OutputOptions, Schedule, supervise};

fn parse_lease(s: &str) -> Result<(Ipv4Addr, u8), String> {
    parse_ipv4_prefix(s).map_err(|e| e.to_string())
}

#[derive(Args)]
pub struct SimCmd {
    /// Lease handed out by the simulated DHCP server.
    #[arg(long, value_name = "CIDR", value_parser = parse_lease, default_value = "10.0.0.5/24")]
    lease: (Ipv4Addr, u8),

    /// Gateway handed out with the lease.
    #[arg(long)]
    gateway: Option<Ipv4Addr>,

    /// Derive the link-local address as fe80::ID instead of from the MAC.
    #[arg(long, value_name = "ID")]
    link_local_id: Option<u64>,

    /// Keep the link-local address tentative for DAD_POLLS polls.
    #[arg(long, value_name = "DAD_POLLS")]
    link_local_dad: Option<u32>,

    /// Reinitialize the interface after MS milliseconds.
    #[arg(long, value_name = "MS")]
    reinit_after: Option<u64>,

    /// Lease offered from the reinit onwards.
    #[arg(long, value_name = "CIDR", value_parser = parse_lease)]
    reinit_lease: Option<(Ipv4Addr, u8)>,

    /// Simulate one throughput session of BYTES bytes over one second.
    #[arg(long, value_name = "BYTES")]
    iperf_session: Option<u64>,

    /// Stop after MS milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 500)]
    duration: u64,
}

impl SimCmd {
    fn manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::new()
            .link_local_preferred(self.link_local_dad.is_none())
            .engine(EngineConfig::new().idle_poll(Duration::from_millis(1)));
        if self.iperf_session.is_some() {
            config = config.throughput(ThroughputConfig::default());
        }
        config
    }

    fn sim_lease(&self, (address, prefix_len): (Ipv4Addr, u8)) -> SimLease {
        SimLease::new(address, prefix_len, self.gateway)
    }

    pub async fn run(&self, opts: OutputOptions) -> anyhow::Result<()> {
        let net = SimNetwork::new();
        net.offer_lease(self.sim_lease(self.lease));
        if let Some(id) = self.link_local_id {
            net.set_link_local_id(id);
        }
        if let Some(polls) = self.link_local_dad {
            net.set_dad_polls(polls);
        }
        if let Some(bytes) = self.iperf_session {
            net.complete_session(
                "192.0.2.10:40122".parse::<SocketAddr>()?,
                bytes,
                Duration::from_secs(1),
            );
        }

        let mut manager = InterfaceManager::new(SimStack::new(net.clone()), self.manager_config());
        let events = manager.subscribe();
        manager.init().await?;

        let schedule = Schedule {
            reinit_after: self.reinit_after.map(Duration::from_millis),
            stop_after: Some(Duration::from_millis(self.duration)),
            dump_on_exit: true,
            ..Default::default()
        };
        let reinit_lease = self.reinit_lease.map(|lease| self.sim_lease(lease));
        supervise(&mut manager, events, opts, schedule, || {
            if let Some(lease) = reinit_lease {
                info!(address = %lease.address, "offering new lease");
                net.offer_lease(lease);
            }
        })
        .await
    }
}
