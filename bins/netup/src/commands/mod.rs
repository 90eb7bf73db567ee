//! netup command implementations.

pub mod run;
pub mod sim;

use std::future;
use std::time::Duration;

use netup::{AddressEvent, Diagnostics, InterfaceManager, Stack};
use serde::Serialize;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, Interval, interval_at, sleep};
use tracing::{error, info, warn};

/// Output settings shared by all commands.
#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub pretty: bool,
}

/// Timed actions while the interface is running.
#[derive(Debug, Default)]
pub struct Schedule {
    /// Dump statistics periodically.
    pub debug_every: Option<Duration>,
    /// Reinitialize once after this delay.
    pub reinit_after: Option<Duration>,
    /// Shut down after this delay instead of waiting for Ctrl-C.
    pub stop_after: Option<Duration>,
    /// Dump statistics before shutting down.
    pub dump_on_exit: bool,
}

fn print_json<T: Serialize>(value: &T, opts: OutputOptions) -> anyhow::Result<()> {
    let line = if opts.pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", line);
    Ok(())
}

/// Print an address event. Text mode relies on the library's log line.
fn print_event(event: &AddressEvent, opts: OutputOptions) -> anyhow::Result<()> {
    if opts.json {
        print_json(event, opts)?;
    }
    Ok(())
}

async fn dump<S: Stack>(manager: &InterfaceManager<S>, opts: OutputOptions) -> anyhow::Result<()> {
    let diagnostics: Diagnostics = manager.debug().await;
    if opts.json {
        print_json(&diagnostics, opts)?;
    }
    Ok(())
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn sleep_or_forever(delay: Option<Duration>) {
    match delay {
        Some(delay) => sleep(delay).await,
        None => future::pending().await,
    }
}

/// Run an initialized manager until Ctrl-C or the scheduled stop.
///
/// `events` should be subscribed before `init` so early reports are kept.
/// SIGHUP reinitializes the interface, SIGUSR1 dumps statistics.
/// `before_reinit` runs before the scheduled reinit.
pub async fn supervise<S: Stack>(
    manager: &mut InterfaceManager<S>,
    mut events: Receiver<AddressEvent>,
    opts: OutputOptions,
    schedule: Schedule,
    mut before_reinit: impl FnMut(),
) -> anyhow::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut stats = schedule
        .debug_every
        .map(|every| interval_at(Instant::now() + every, every));

    let stop = sleep_or_forever(schedule.stop_after);
    tokio::pin!(stop);
    let reinit = sleep_or_forever(schedule.reinit_after);
    tokio::pin!(reinit);
    let mut reinit_done = false;

    info!("running (Ctrl+C to stop, SIGHUP to reinit, SIGUSR1 for statistics)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut stop => break,
            _ = &mut reinit, if !reinit_done => {
                reinit_done = true;
                before_reinit();
                if let Err(e) = manager.reinit().await {
                    error!(error = %e, "reinit failed");
                }
            }
            _ = hangup.recv() => {
                info!("SIGHUP received");
                if let Err(e) = manager.reinit().await {
                    error!(error = %e, "reinit failed");
                }
            }
            _ = user1.recv() => dump(manager, opts).await?,
            _ = tick(&mut stats) => dump(manager, opts).await?,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, opts)?,
                Err(RecvError::Lagged(missed)) => warn!(missed, "address events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    // Report anything published just before stopping.
    while let Ok(event) = events.try_recv() {
        print_event(&event, opts)?;
    }
    if schedule.dump_on_exit {
        dump(manager, opts).await?;
    }
    manager.shutdown().await?;
    Ok(())
}
