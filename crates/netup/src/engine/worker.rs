//! The engine worker loop and its stack handle.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Job, StatusCallback};
use crate::diagnostics::{Diagnostics, EngineStats};
use crate::error::Result;
use crate::stack::Stack;
use crate::status::InterfaceStatus;
use crate::throughput::ReportCallback;

/// Exclusive access to the stack, only available on the engine thread.
///
/// Every stack mutation goes through here. After each marshaled call and
/// each poll round the core compares the interface snapshot with the last
/// one it reported and invokes the status callback on any difference.
pub struct Core<S: Stack> {
    stack: S,
    status_callback: Option<StatusCallback>,
    last_status: Option<InterfaceStatus>,
    stats: EngineStats,
    running: bool,
}

impl<S: Stack> Core<S> {
    pub(crate) fn new(stack: S) -> Self {
        Self {
            stack,
            status_callback: None,
            last_status: None,
            stats: EngineStats::default(),
            running: true,
        }
    }

    /// Create and attach the interface.
    pub fn add_interface(&mut self) -> Result<()> {
        debug!("add_interface");
        self.stack
            .add_interface()
            .map_err(|e| e.with_context("add_interface"))
    }

    /// Detach and destroy the interface. Also drops the status callback.
    pub fn remove_interface(&mut self) -> Result<()> {
        debug!("remove_interface");
        self.stack
            .remove_interface()
            .map_err(|e| e.with_context("remove_interface"))?;
        self.status_callback = None;
        self.last_status = None;
        Ok(())
    }

    /// Check if an interface is attached.
    pub fn is_attached(&self) -> bool {
        self.stack.is_attached()
    }

    pub fn set_default(&mut self) -> Result<()> {
        debug!("set_default");
        self.stack
            .set_default()
            .map_err(|e| e.with_context("set_default"))
    }

    pub fn set_up(&mut self) -> Result<()> {
        debug!("set_up");
        self.stack.set_up().map_err(|e| e.with_context("set_up"))
    }

    pub fn set_down(&mut self) -> Result<()> {
        debug!("set_down");
        self.stack.set_down().map_err(|e| e.with_context("set_down"))
    }

    /// Generate the IPv6 link-local address.
    pub fn create_ip6_linklocal(&mut self, preferred: bool) -> Result<()> {
        debug!(preferred, "create_ip6_linklocal");
        self.stack
            .create_ip6_linklocal(preferred)
            .map_err(|e| e.with_context("create_ip6_linklocal"))
    }

    pub fn dhcp_start(&mut self) -> Result<()> {
        debug!("dhcp_start");
        self.stack
            .dhcp_start()
            .map_err(|e| e.with_context("dhcp_start"))
    }

    pub fn dhcp_stop(&mut self) -> Result<()> {
        debug!("dhcp_stop");
        self.stack
            .dhcp_stop()
            .map_err(|e| e.with_context("dhcp_stop"))
    }

    /// Register the status-change callback, replacing any previous one.
    ///
    /// The callback is not invoked for the current state; it fires on the
    /// next change.
    pub fn set_status_callback(&mut self, callback: StatusCallback) {
        debug!("set_status_callback");
        self.status_callback = Some(callback);
        self.last_status = self.stack.status();
    }

    /// Start the embedded throughput-test server.
    pub fn start_throughput_server(&mut self, port: u16, report: ReportCallback) -> Result<()> {
        debug!(port, "start_throughput_server");
        self.stack
            .start_throughput_server(port, report)
            .map_err(|e| e.with_context("start_throughput_server"))
    }

    /// Current interface snapshot.
    pub fn status(&self) -> Option<InterfaceStatus> {
        self.stack.status()
    }

    /// Engine counters plus the stack's protocol statistics.
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            engine: self.stats.clone(),
            stack: self.stack.stats(),
            status: self.stack.status(),
        }
    }

    /// Stop the worker loop once the current call returns.
    pub fn stop(&mut self) {
        debug!("engine stop requested");
        self.running = false;
    }

    pub(crate) fn poll(&mut self, now: Instant) {
        self.stats.polls += 1;
        self.stack.poll(now);
        self.notify_status();
    }

    fn poll_delay(&mut self, now: Instant, idle: Duration) -> Duration {
        self.stack
            .poll_delay(now)
            .map_or(idle, |delay| delay.min(idle))
    }

    fn notify_status(&mut self) {
        let Some(callback) = self.status_callback.as_mut() else {
            return;
        };
        let current = self.stack.status();
        if current == self.last_status {
            return;
        }
        if let Some(status) = &current {
            trace!(?status, "interface status changed");
            callback(status);
            self.stats.status_notifications += 1;
        }
        self.last_status = current;
    }

    fn run_job(&mut self, job: Job<S>) {
        self.stats.jobs += 1;
        job(self);
        self.notify_status();
    }
}

/// Worker loop: run marshaled calls in order and poll the stack between
/// them until stopped or every [`Engine`](super::Engine) handle is gone.
pub(crate) async fn run<S: Stack>(
    mut core: Core<S>,
    mut jobs: mpsc::UnboundedReceiver<Job<S>>,
    idle_poll: Duration,
    on_ready: impl FnOnce(),
) {
    debug!("engine worker started");
    on_ready();

    while core.running {
        let delay = core.poll_delay(Instant::now(), idle_poll);

        tokio::select! {
            job = jobs.recv() => match job {
                Some(job) => core.run_job(job),
                None => break,
            },
            _ = tokio::time::sleep(delay) => {}
        }

        if core.running {
            core.poll(Instant::now());
        }
    }

    jobs.close();
    debug!("engine worker exiting");
}
