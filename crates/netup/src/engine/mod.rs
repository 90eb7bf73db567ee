//! Engine worker thread and marshaled calls.
//!
//! The stack is not safe for concurrent mutation, so it lives on a
//! dedicated worker thread. Everything else talks to it through
//! [`Engine::call`], which queues a closure onto the worker and waits for
//! its result. Inside the closure the caller gets a [`Core`], the only
//! handle that can touch the stack.
//!
//! # Example
//!
//! ```ignore
//! use netup::engine::{start_engine_and_wait, EngineConfig};
//!
//! let (engine, thread) = start_engine_and_wait(stack, EngineConfig::default()).await?;
//!
//! // Runs on the worker thread.
//! let attached = engine.call(|core| core.is_attached()).await?;
//!
//! engine.stop().await?;
//! thread.join().await;
//! ```

mod startup;
mod worker;

use std::fmt;
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::error::{Error, Result};
use crate::stack::Stack;
use crate::status::InterfaceStatus;

pub use startup::{ReadySignal, StartupGate, start_engine_and_wait};
pub use worker::Core;

/// Callback invoked on the worker thread whenever the interface changes.
pub type StatusCallback = Box<dyn FnMut(&InterfaceStatus) + Send>;

type Job<S> = Box<dyn FnOnce(&mut Core<S>) + Send>;

/// Engine worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Longest the worker sleeps between stack polls (default: 10 ms).
    pub idle_poll: Duration,
    /// Worker thread name (default: "netup-engine").
    pub thread_name: String,
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle poll interval.
    pub fn idle_poll(mut self, interval: Duration) -> Self {
        self.idle_poll = interval;
        self
    }

    /// Set the worker thread name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_millis(10),
            thread_name: "netup-engine".to_string(),
        }
    }
}

/// Handle for marshaling calls onto the engine worker.
///
/// Cheap to clone; all clones feed the same worker.
pub struct Engine<S: Stack> {
    jobs: mpsc::UnboundedSender<Job<S>>,
}

impl<S: Stack> Engine<S> {
    /// Spawn the worker thread.
    ///
    /// `on_ready` is the init-done hook: it runs on the worker once the
    /// worker is able to process calls. If the worker cannot start,
    /// `on_ready` is dropped without being called.
    pub fn spawn(
        stack: S,
        config: EngineConfig,
        on_ready: impl FnOnce() + Send + 'static,
    ) -> Result<(Self, EngineThread)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let idle_poll = config.idle_poll;

        let handle = thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "engine runtime could not be built");
                        return;
                    }
                };
                runtime.block_on(worker::run(Core::new(stack), rx, idle_poll, on_ready));
            })
            .map_err(|e| Error::EngineStartup(format!("spawning worker thread: {}", e)))?;

        Ok((
            Self { jobs: tx },
            EngineThread {
                handle: Some(handle),
            },
        ))
    }

    /// Run `f` on the worker thread and wait for its result.
    ///
    /// Calls are executed in submission order. Fails with
    /// [`Error::EngineStopped`] if the worker has exited.
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Core<S>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(Box::new(move |core: &mut Core<S>| {
                let _ = tx.send(f(core));
            }))
            .map_err(|_| Error::EngineStopped)?;
        rx.await.map_err(|_| Error::EngineStopped)
    }

    /// Check if the worker is still accepting calls.
    pub fn is_running(&self) -> bool {
        !self.jobs.is_closed()
    }

    /// Ask the worker to exit after the calls queued before this one.
    pub async fn stop(&self) -> Result<()> {
        self.call(|core| core.stop()).await
    }
}

impl<S: Stack> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
        }
    }
}

impl<S: Stack> fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_running())
            .finish()
    }
}

/// Join handle for the worker thread.
#[derive(Debug)]
pub struct EngineThread {
    handle: Option<thread::JoinHandle<()>>,
}

impl EngineThread {
    /// Wait for the worker thread to exit.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                error!("engine worker panicked");
            }
        }
    }
}
