//! Engine and stack statistics.
//!
//! [`dump`] is the diagnostics port: it asks the engine worker for a
//! snapshot of its counters and the stack's protocol statistics, logs them
//! and hands them back. It does not depend on any address being assigned.
//!
//! # Example
//!
//! ```ignore
//! let diagnostics = manager.debug().await;
//! println!("{} frames received", diagnostics.stack.link.rx_frames);
//! ```

use std::fmt;

use tracing::info;

use crate::engine::Engine;
use crate::error::Result;
use crate::stack::Stack;
use crate::status::InterfaceStatus;

/// Link-layer frame counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LinkStats {
    /// Frames received.
    pub rx_frames: u64,
    /// Bytes received.
    pub rx_bytes: u64,
    /// Frames transmitted.
    pub tx_frames: u64,
    /// Bytes transmitted.
    pub tx_bytes: u64,
    /// Receive errors.
    pub rx_errors: u64,
    /// Transmit errors.
    pub tx_errors: u64,
}

impl LinkStats {
    /// Total frames (RX + TX).
    pub fn total_frames(&self) -> u64 {
        self.rx_frames + self.tx_frames
    }

    /// Total errors (RX + TX).
    pub fn total_errors(&self) -> u64 {
        self.rx_errors + self.tx_errors
    }
}

/// DHCP client counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DhcpStats {
    /// Times the client was started.
    pub starts: u64,
    /// Times the client was stopped.
    pub stops: u64,
    /// Leases applied to the interface.
    pub leases: u64,
    /// Leases lost or expired.
    pub lease_losses: u64,
}

/// Protocol statistics reported by a [`Stack`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StackStats {
    pub link: LinkStats,
    pub dhcp: DhcpStats,
    /// Interfaces added over the stack's lifetime.
    pub interfaces_added: u64,
    /// Interfaces removed over the stack's lifetime.
    pub interfaces_removed: u64,
    /// Open sockets.
    pub sockets: usize,
    /// Completed throughput-test sessions.
    pub throughput_sessions: u64,
}

/// Counters kept by the engine worker itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EngineStats {
    /// Marshaled calls executed.
    pub jobs: u64,
    /// Stack poll rounds.
    pub polls: u64,
    /// Status callbacks delivered.
    pub status_notifications: u64,
}

/// Combined diagnostics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Diagnostics {
    pub engine: EngineStats,
    pub stack: StackStats,
    /// Interface status, if one is attached.
    pub status: Option<InterfaceStatus>,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = &self.engine;
        let stack = &self.stack;
        let link = &stack.link;

        writeln!(f, "ENGINE")?;
        writeln!(
            f,
            "  jobs: {} polls: {} status notifications: {}",
            engine.jobs, engine.polls, engine.status_notifications
        )?;
        writeln!(f, "LINK")?;
        writeln!(
            f,
            "  rx: {} frames {} bytes, tx: {} frames {} bytes, err: rx {} tx {}",
            link.rx_frames,
            link.rx_bytes,
            link.tx_frames,
            link.tx_bytes,
            link.rx_errors,
            link.tx_errors
        )?;
        writeln!(f, "IF")?;
        writeln!(
            f,
            "  added: {} removed: {}",
            stack.interfaces_added, stack.interfaces_removed
        )?;
        match &self.status {
            Some(status) => writeln!(
                f,
                "  state: {} default: {} ip4: {}/{}",
                if status.up { "up" } else { "down" },
                status.default,
                status.ipv4.address,
                status.ipv4.prefix_len()
            )?,
            None => writeln!(f, "  state: detached")?,
        }
        writeln!(f, "DHCP")?;
        writeln!(
            f,
            "  starts: {} stops: {} leases: {} losses: {}",
            stack.dhcp.starts, stack.dhcp.stops, stack.dhcp.leases, stack.dhcp.lease_losses
        )?;
        writeln!(f, "SOCKETS")?;
        write!(
            f,
            "  open: {} throughput sessions: {}",
            stack.sockets, stack.throughput_sessions
        )
    }
}

impl Diagnostics {
    /// Write the snapshot to the log, one line per row.
    pub fn log(&self) {
        for line in self.to_string().lines() {
            info!("{}", line);
        }
    }
}

/// Collect diagnostics from the engine and log them.
pub async fn dump<S: Stack>(engine: &Engine<S>) -> Result<Diagnostics> {
    let diagnostics = engine.call(|core| core.diagnostics()).await?;
    diagnostics.log();
    Ok(diagnostics)
}
