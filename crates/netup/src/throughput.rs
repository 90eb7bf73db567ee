//! Throughput-test server attachment.
//!
//! The stack embeds a TCP sink compatible with `iperf -c`: it accepts a
//! connection on the configured port, counts every byte the client sends
//! and reports a summary when the session ends. Starting it is purely
//! additive; a failure is logged and otherwise ignored.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;
use crate::stack::Stack;

/// Default iperf port.
pub const DEFAULT_PORT: u16 = 5001;

/// How a throughput session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ReportKind {
    /// The server side finished normally.
    TcpDoneServer = 0,
    /// The client side finished normally.
    TcpDoneClient = 1,
    /// Aborted locally.
    TcpAbortedLocal = 2,
    /// Aborted locally because of invalid data.
    TcpAbortedLocalDataError = 3,
    /// Aborted locally because of a transmit error.
    TcpAbortedLocalTxError = 4,
    /// Aborted by the remote end.
    TcpAbortedRemote = 5,
}

impl ReportKind {
    /// Numeric report code, as printed in report lines.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Check if the session completed normally.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::TcpDoneServer | Self::TcpDoneClient)
    }
}

/// Summary of one completed throughput session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ThroughputReport {
    pub kind: ReportKind,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    /// Payload bytes received.
    pub bytes: u64,
    pub duration: Duration,
}

impl ThroughputReport {
    /// Bandwidth in kbit/s (bits per millisecond).
    pub fn bandwidth_kbps(&self) -> u64 {
        let ms = self.duration.as_millis() as u64;
        if ms == 0 {
            return 0;
        }
        self.bytes.saturating_mul(8) / ms
    }
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iperf report [{}]: {}, transferred: {} (bytes), duration: {} (ms), bandwidth {} (kb/s)",
            self.kind.code(),
            self.remote,
            self.bytes,
            self.duration.as_millis(),
            self.bandwidth_kbps()
        )
    }
}

/// Callback invoked on the engine thread for every finished session.
pub type ReportCallback = Box<dyn FnMut(&ThroughputReport) + Send>;

/// Throughput server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ThroughputConfig {
    /// TCP port to listen on (default: 5001).
    pub port: u16,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// Fire-and-forget throughput server.
pub struct ThroughputProbe {
    port: u16,
    callback: Option<ReportCallback>,
}

impl ThroughputProbe {
    /// Create a probe that logs each report.
    pub fn new(config: &ThroughputConfig) -> Self {
        Self {
            port: config.port,
            callback: None,
        }
    }

    /// Replace the default logging callback.
    pub fn on_report(mut self, callback: impl FnMut(&ThroughputReport) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// The port the server will listen on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start the server on the engine. Failures are logged, never returned.
    pub async fn attach<S: Stack>(self, engine: &Engine<S>) {
        let port = self.port;
        let callback: ReportCallback = match self.callback {
            Some(callback) => callback,
            None => Box::new(|report: &ThroughputReport| info!("{}", report)),
        };

        match engine
            .call(move |core| core.start_throughput_server(port, callback))
            .await
        {
            Ok(Ok(())) => info!(port, "throughput server listening"),
            Ok(Err(e)) | Err(e) => warn!(port, error = %e, "throughput server not started"),
        }
    }
}

impl fmt::Debug for ThroughputProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThroughputProbe")
            .field("port", &self.port)
            .field("custom_callback", &self.callback.is_some())
            .finish()
    }
}
