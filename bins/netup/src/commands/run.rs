//! netup run - bring up a TAP device on the smoltcp stack.

use std::time::Duration;

use anyhow::Context;
use clap::Args;
use netup::smol::SmolStack;
use netup::tap::{TapConfig, TapDriver};
use netup::throughput::DEFAULT_PORT;
use netup::util::parse_mac;
use netup::{EngineConfig, InterfaceManager, ManagerConfig, ThroughputConfig};

use super::{OutputOptions, Schedule, supervise};

fn parse_mac_arg(s: &str) -> Result<[u8; 6], String> {
    parse_mac(s).map_err(|e| e.to_string())
}

#[derive(Args)]
pub struct RunCmd {
    /// TAP device name.
    #[arg(short, long, default_value = "tap0")]
    device: String,

    /// MAC address used on the device.
    #[arg(long, value_parser = parse_mac_arg, default_value = "02:00:00:00:00:01")]
    mac: [u8; 6],

    /// IP MTU.
    #[arg(long, default_value_t = 1500)]
    mtu: usize,

    /// Do not mark the link-local address preferred before duplicate
    /// address detection.
    #[arg(long)]
    link_local_dad: bool,

    /// Start the iperf-compatible throughput server.
    #[arg(long)]
    iperf: bool,

    /// Throughput server port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    iperf_port: u16,

    /// Dump statistics every SECS seconds.
    #[arg(long, value_name = "SECS")]
    debug_stats: Option<u64>,

    /// Engine idle poll interval in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 10)]
    idle_poll: u64,
}

impl RunCmd {
    fn manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::new()
            .link_local_preferred(!self.link_local_dad)
            .engine(EngineConfig::new().idle_poll(Duration::from_millis(self.idle_poll)));
        if self.iperf {
            config = config.throughput(ThroughputConfig {
                port: self.iperf_port,
            });
        }
        config
    }

    pub async fn run(&self, opts: OutputOptions) -> anyhow::Result<()> {
        let tap = TapConfig::new(&self.device).mac(self.mac).mtu(self.mtu);
        let driver = TapDriver::new(tap).context("invalid TAP configuration")?;
        let mut manager = InterfaceManager::new(SmolStack::new(driver), self.manager_config());

        let events = manager.subscribe();
        if let Err(e) = manager.init().await {
            if e.is_permission_denied() {
                anyhow::bail!("{} (requires CAP_NET_ADMIN)", e);
            }
            return Err(e).context("interface bring-up failed");
        }

        let schedule = Schedule {
            debug_every: self.debug_stats.map(Duration::from_secs),
            ..Default::default()
        };
        supervise(&mut manager, events, opts, schedule, || {}).await
    }
}
