//! One-shot engine startup handshake.

use tokio::sync::oneshot;
use tracing::debug;

use super::{Engine, EngineConfig, EngineThread};
use crate::error::{Error, Result};
use crate::stack::Stack;

/// Blocks a caller until the engine worker reports that it is running.
///
/// Single use: create it, hand the [`ReadySignal`] to the engine's init
/// hook, wait once.
#[derive(Debug)]
pub struct StartupGate {
    ready: oneshot::Receiver<()>,
}

/// Completion handle fired by the engine worker.
#[derive(Debug)]
pub struct ReadySignal {
    tx: oneshot::Sender<()>,
}

impl ReadySignal {
    /// Report the engine as running.
    pub fn signal(self) {
        let _ = self.tx.send(());
    }
}

impl StartupGate {
    /// Create a gate and its completion handle.
    pub fn channel() -> (Self, ReadySignal) {
        let (tx, ready) = oneshot::channel();
        (Self { ready }, ReadySignal { tx })
    }

    /// Wait for the signal.
    ///
    /// Fails if the handle is dropped without firing, i.e. the worker died
    /// before it started processing.
    pub async fn wait(self) -> Result<()> {
        self.ready
            .await
            .map_err(|_| Error::EngineStartup("worker exited before signalling readiness".into()))
    }
}

/// Spawn the engine worker for `stack` and return once it is running.
pub async fn start_engine_and_wait<S: Stack>(
    stack: S,
    config: EngineConfig,
) -> Result<(Engine<S>, EngineThread)> {
    let (gate, ready) = StartupGate::channel();
    let (engine, thread) = Engine::spawn(stack, config, move || ready.signal())?;
    gate.wait().await?;
    debug!("engine worker ready");
    Ok((engine, thread))
}
