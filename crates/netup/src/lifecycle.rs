//! Interface bring-up, teardown and reinitialization.
//!
//! The lifecycle is split in two capability sets:
//!
//! - [`InterfaceSetup`] performs the pre-traffic bring-up. It runs the whole
//!   sequence as direct calls on the engine [`Core`] inside a single job, so
//!   the stack is not polled until the interface is fully configured.
//! - [`AttachedInterface`] is what `attach` turns the setup into. Every
//!   operation on it is a marshaled call. [`AttachedInterface::remove`]
//!   consumes it back into an `InterfaceSetup`, so attaching twice without a
//!   removal in between does not type-check.
//!
//! [`InterfaceManager`] composes both with the engine startup gate, the
//! status observer and the optional throughput probe.
//!
//! # Example
//!
//! ```ignore
//! use netup::{InterfaceManager, ManagerConfig};
//!
//! let mut manager = InterfaceManager::new(stack, ManagerConfig::default());
//! manager.init().await?;
//!
//! // Link flapped: rebuild the interface.
//! manager.reinit().await?;
//!
//! manager.debug().await;
//! manager.shutdown().await?;
//! ```

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::diagnostics::{self, Diagnostics, EngineStats};
use crate::engine::{Core, Engine, EngineThread, start_engine_and_wait};
use crate::error::{Error, Result};
use crate::observer::{AddressEvent, AddressEventStream, AddressTracker, StatusObserver};
use crate::stack::Stack;
use crate::status::InterfaceStatus;
use crate::throughput::ThroughputProbe;

/// Lifecycle state of an [`InterfaceManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LifecycleState {
    /// `init` has not run yet.
    Uninitialized,
    /// `init` is in progress. Seen afterwards only if `init` was cancelled.
    Starting,
    /// The interface is attached and configured.
    Running,
    /// `reinit` is in progress. Seen afterwards only if `reinit` was
    /// cancelled; another `reinit` recovers.
    Reinitializing,
    /// A bring-up or teardown step failed. `reinit` recovers.
    Faulted,
    /// The engine was shut down.
    Stopped,
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Reinitializing => "reinitializing",
            Self::Faulted => "faulted",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters for creating the interface, before it is attached.
#[derive(Debug, Clone)]
pub struct InterfaceSetup {
    observer: StatusObserver,
    link_local_preferred: bool,
}

impl InterfaceSetup {
    pub(crate) fn new(observer: StatusObserver, link_local_preferred: bool) -> Self {
        Self {
            observer,
            link_local_preferred,
        }
    }

    /// The observer registered on attach.
    pub fn observer(&self) -> &StatusObserver {
        &self.observer
    }

    /// Run the bring-up sequence directly on the engine core.
    ///
    /// Stops at the first failing step.
    pub fn bring_up<S: Stack>(&self, core: &mut Core<S>) -> Result<()> {
        core.add_interface()?;
        core.set_default()?;
        core.set_status_callback(self.observer.to_callback());
        core.set_up()?;
        core.create_ip6_linklocal(self.link_local_preferred)?;
        core.dhcp_start()
    }

    /// Bring the interface up as a single engine job.
    pub async fn attach<S: Stack>(self, engine: &Engine<S>) -> Result<AttachedInterface<S>> {
        let setup = self.clone();
        engine.call(move |core| setup.bring_up(core)).await??;
        debug!("interface attached");
        Ok(AttachedInterface {
            engine: engine.clone(),
            setup: self,
        })
    }

    /// Bring the interface up with one marshaled call per step.
    ///
    /// Used to rebuild the interface while the engine is live.
    pub async fn reattach<S: Stack>(self, engine: &Engine<S>) -> Result<AttachedInterface<S>> {
        engine.call(|core| core.add_interface()).await??;

        let callback = self.observer.to_callback();
        engine
            .call(move |core| core.set_status_callback(callback))
            .await?;

        engine.call(|core| core.set_default()).await??;
        engine.call(|core| core.set_up()).await??;

        let preferred = self.link_local_preferred;
        engine
            .call(move |core| core.create_ip6_linklocal(preferred))
            .await??;
        engine.call(|core| core.dhcp_start()).await??;

        debug!("interface reattached");
        Ok(AttachedInterface {
            engine: engine.clone(),
            setup: self,
        })
    }
}

/// The live interface. All operations are marshaled onto the engine.
pub struct AttachedInterface<S: Stack> {
    engine: Engine<S>,
    setup: InterfaceSetup,
}

impl<S: Stack> AttachedInterface<S> {
    /// The engine the interface lives on.
    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    pub async fn dhcp_stop(&self) -> Result<()> {
        self.engine.call(|core| core.dhcp_stop()).await?
    }

    pub async fn set_down(&self) -> Result<()> {
        self.engine.call(|core| core.set_down()).await?
    }

    /// Current interface snapshot.
    pub async fn status(&self) -> Result<Option<InterfaceStatus>> {
        self.engine.call(|core| core.status()).await
    }

    /// Stop DHCP, bring the interface down and remove it.
    ///
    /// DHCP-stop and down failures are logged and teardown continues. A
    /// removal failure is returned; the interface may still be attached.
    pub async fn remove(self) -> Result<InterfaceSetup> {
        if let Err(e) = self.dhcp_stop().await {
            warn!(error = %e, "dhcp stop failed, continuing teardown");
        }
        if let Err(e) = self.set_down().await {
            warn!(error = %e, "set down failed, continuing teardown");
        }
        self.engine.call(|core| core.remove_interface()).await??;
        debug!("interface removed");
        Ok(self.setup)
    }
}

impl<S: Stack> fmt::Debug for AttachedInterface<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedInterface")
            .field("engine", &self.engine)
            .field("setup", &self.setup)
            .finish()
    }
}

/// Owner of the engine and the single managed interface.
pub struct InterfaceManager<S: Stack> {
    config: ManagerConfig,
    observer: StatusObserver,
    state: LifecycleState,
    stack: Option<S>,
    engine: Option<Engine<S>>,
    thread: Option<EngineThread>,
    interface: Option<AttachedInterface<S>>,
    probe: Option<ThroughputProbe>,
    last_diagnostics: Option<Diagnostics>,
}

impl<S: Stack> InterfaceManager<S> {
    /// Create a manager for `stack`. Nothing runs until [`init`](Self::init).
    pub fn new(stack: S, config: ManagerConfig) -> Self {
        let observer = StatusObserver::new(config.event_capacity);
        Self {
            config,
            observer,
            state: LifecycleState::Uninitialized,
            stack: Some(stack),
            engine: None,
            thread: None,
            interface: None,
            probe: None,
            last_diagnostics: None,
        }
    }

    /// Use a custom throughput probe instead of the configured one.
    pub fn set_throughput_probe(&mut self, probe: ThroughputProbe) {
        self.probe = Some(probe);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The address tracker shared with the status callback.
    pub fn tracker(&self) -> &AddressTracker {
        self.observer.tracker()
    }

    /// The engine handle, once started.
    pub fn engine(&self) -> Option<&Engine<S>> {
        self.engine.as_ref()
    }

    /// Subscribe to address events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AddressEvent> {
        self.observer.subscribe()
    }

    /// Address events as a stream.
    pub fn events(&self) -> AddressEventStream {
        self.observer.events()
    }

    /// Start the engine and bring the interface up.
    ///
    /// Returns once the worker is running, the interface is up and the
    /// DHCP client and IPv6 link-local generation have been started.
    /// Address assignment continues in the background.
    pub async fn init(&mut self) -> Result<()> {
        if self.state != LifecycleState::Uninitialized {
            return Err(self.invalid("init"));
        }
        let Some(stack) = self.stack.take() else {
            return Err(self.invalid("init"));
        };

        info!("starting engine");
        self.state = LifecycleState::Starting;
        let (engine, thread) = match start_engine_and_wait(stack, self.config.engine.clone()).await
        {
            Ok(started) => started,
            Err(e) => {
                error!(error = %e, "engine startup failed");
                self.state = LifecycleState::Stopped;
                return Err(e);
            }
        };
        self.engine = Some(engine.clone());
        self.thread = Some(thread);

        let setup = InterfaceSetup::new(self.observer.clone(), self.config.link_local_preferred);
        let attached = setup
            .attach(&engine)
            .await
            .map_err(|e| self.fault(e, "interface bring-up failed"))?;
        self.interface = Some(attached);

        if let Some(probe) = self.probe.take() {
            probe.attach(&engine).await;
        } else if let Some(throughput) = &self.config.throughput {
            ThroughputProbe::new(throughput).attach(&engine).await;
        }

        self.state = LifecycleState::Running;
        info!("interface up, dhcp and ipv6 link-local started");
        Ok(())
    }

    /// Tear the interface down and build it again.
    ///
    /// Valid once `init` has started the engine, including after an
    /// interrupted `init` or `reinit`. The address tracker is
    /// reset between removal and recreation, so addresses are reported
    /// again as the new interface converges. If removal fails the
    /// interface is not recreated and the manager becomes
    /// [`LifecycleState::Faulted`]; a later `reinit` retries the removal.
    pub async fn reinit(&mut self) -> Result<()> {
        let engine = match (self.state, &self.engine) {
            (
                LifecycleState::Starting
                | LifecycleState::Running
                | LifecycleState::Reinitializing
                | LifecycleState::Faulted,
                Some(engine),
            ) => engine.clone(),
            _ => return Err(self.invalid("reinit")),
        };

        info!("reinitializing interface");
        self.state = LifecycleState::Reinitializing;

        let setup = match self.interface.take() {
            Some(attached) => attached.remove().await,
            None => self.recover(&engine).await,
        }
        .map_err(|e| self.fault(e, "interface removal failed, not recreating"))?;

        let observer = setup.observer().clone();
        engine
            .call(move |_| observer.reset())
            .await
            .map_err(|e| self.fault(e, "address tracker reset failed"))?;

        let attached = setup
            .reattach(&engine)
            .await
            .map_err(|e| self.fault(e, "interface bring-up failed"))?;
        self.interface = Some(attached);
        self.state = LifecycleState::Running;
        info!("interface reinitialized");
        Ok(())
    }

    /// Remove an interface left behind by a failed step.
    async fn recover(&self, engine: &Engine<S>) -> Result<InterfaceSetup> {
        engine
            .call(|core| {
                if !core.is_attached() {
                    return Ok(());
                }
                warn!("removing interface left attached by a failed step");
                if let Err(e) = core.dhcp_stop() {
                    debug!(error = %e, "dhcp stop during recovery");
                }
                core.remove_interface()
            })
            .await??;
        Ok(InterfaceSetup::new(
            self.observer.clone(),
            self.config.link_local_preferred,
        ))
    }

    /// Dump engine and stack statistics.
    ///
    /// Works in every state. Before `init` the engine counters are zero and
    /// the stack statistics come from the idle stack; after `shutdown` the
    /// snapshot taken while stopping is returned.
    pub async fn debug(&self) -> Diagnostics {
        if let Some(engine) = &self.engine {
            match diagnostics::dump(engine).await {
                Ok(diagnostics) => return diagnostics,
                Err(e) => warn!(error = %e, "engine unavailable, reporting last statistics"),
            }
        }
        let diagnostics = self.offline_diagnostics();
        diagnostics.log();
        diagnostics
    }

    fn offline_diagnostics(&self) -> Diagnostics {
        match (&self.stack, &self.last_diagnostics) {
            (Some(stack), _) => Diagnostics {
                engine: EngineStats::default(),
                stack: stack.stats(),
                status: stack.status(),
            },
            (None, Some(last)) => last.clone(),
            (None, None) => Diagnostics::default(),
        }
    }

    /// Current interface snapshot, `None` when nothing is attached.
    pub async fn status(&self) -> Result<Option<InterfaceStatus>> {
        match &self.engine {
            Some(engine) => engine.call(|core| core.status()).await,
            None => Ok(None),
        }
    }

    /// Remove the interface and stop the engine.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(attached) = self.interface.take()
            && let Err(e) = attached.remove().await
        {
            warn!(error = %e, "interface removal failed during shutdown");
        }
        if let Some(engine) = self.engine.take() {
            match engine.call(|core| core.diagnostics()).await {
                Ok(last) => self.last_diagnostics = Some(last),
                Err(e) => warn!(error = %e, "final statistics unavailable"),
            }
            engine.stop().await?;
        }
        if let Some(thread) = self.thread.take() {
            thread.join().await;
        }
        self.stack = None;
        self.state = LifecycleState::Stopped;
        info!("engine stopped");
        Ok(())
    }

    fn fault(&mut self, e: Error, message: &str) -> Error {
        error!(error = %e, "{}", message);
        self.state = LifecycleState::Faulted;
        e
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state,
        }
    }
}

impl<S: Stack> fmt::Debug for InterfaceManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceManager")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("interface", &self.interface)
            .finish()
    }
}
