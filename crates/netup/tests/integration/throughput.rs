//! Throughput server integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use netup::sim::SimOp;
use netup::throughput::ReportKind;
use netup::{LifecycleState, ManagerConfig, Result, ThroughputConfig, ThroughputProbe};
use tokio::sync::mpsc;

use crate::common::{Harness, lease};

fn remote() -> SocketAddr {
    "10.0.0.9:40122".parse().unwrap()
}

#[tokio::test]
async fn test_configured_server_started() -> Result<()> {
    let mut h = Harness::with_config(ManagerConfig::new().throughput(ThroughputConfig::default()));
    h.manager.init().await?;

    assert!(
        h.net
            .ops()
            .contains(&SimOp::StartThroughputServer { port: 5001 })
    );

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_session_report() -> Result<()> {
    let mut h = Harness::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let probe = ThroughputProbe::new(&ThroughputConfig::default()).on_report(move |report| {
        let _ = tx.send(report.clone());
    });
    h.manager.set_throughput_probe(probe);

    h.net.offer_lease(lease(5));
    h.manager.init().await?;
    h.net
        .complete_session(remote(), 125_000, Duration::from_secs(1));

    let report = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("report within timeout")
        .expect("callback alive");
    assert_eq!(report.kind, ReportKind::TcpDoneServer);
    assert_eq!(report.local, "10.0.0.5:5001".parse::<SocketAddr>().unwrap());
    assert_eq!(report.remote, remote());
    assert_eq!(report.bandwidth_kbps(), 1000);

    // Survives reinit without being restarted.
    h.net.clear_ops();
    h.manager.reinit().await?;
    h.net
        .complete_session(remote(), 1_000, Duration::from_millis(8));
    let report = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("report within timeout")
        .expect("callback alive");
    assert_eq!(report.bytes, 1_000);
    assert!(
        !h.net
            .ops()
            .iter()
            .any(|op| matches!(op, SimOp::StartThroughputServer { .. }))
    );

    let diagnostics = h.manager.debug().await;
    assert_eq!(diagnostics.stack.throughput_sessions, 2);

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_start_failure_ignored() -> Result<()> {
    let mut h = Harness::with_config(ManagerConfig::new().throughput(ThroughputConfig { port: 5201 }));
    h.net.fail_next(SimOp::StartThroughputServer { port: 5201 });

    h.manager.init().await?;
    assert_eq!(h.manager.state(), LifecycleState::Running);

    h.manager.shutdown().await
}
