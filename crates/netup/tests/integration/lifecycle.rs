//! Lifecycle integration tests.
//!
//! Checks call ordering on the stack, the single-attachment property and
//! the failure policy of init and reinit.

use std::future;
use std::task::Poll;

use netup::sim::SimOp;
use netup::{Error, LifecycleState, ManagerConfig, Result};

use crate::common::{Harness, lease};

const BRING_UP: [SimOp; 5] = [
    SimOp::AddInterface,
    SimOp::SetDefault,
    SimOp::SetUp,
    SimOp::CreateIp6LinkLocal { preferred: true },
    SimOp::DhcpStart,
];

const TEARDOWN: [SimOp; 3] = [SimOp::DhcpStop, SimOp::SetDown, SimOp::RemoveInterface];

/// Count attached interfaces along a call sequence, failing on a second
/// attach.
fn assert_single_attach(ops: &[SimOp]) {
    let mut attached = 0;
    for op in ops {
        match op {
            SimOp::AddInterface => attached += 1,
            SimOp::RemoveInterface => attached -= 1,
            _ => {}
        }
        assert!(attached <= 1, "interface attached twice in {:?}", ops);
    }
}

#[tokio::test]
async fn test_init_sequence() -> Result<()> {
    let mut h = Harness::new();
    assert_eq!(h.manager.state(), LifecycleState::Uninitialized);

    h.manager.init().await?;

    assert_eq!(h.manager.state(), LifecycleState::Running);
    assert_eq!(h.net.ops(), BRING_UP);
    h.assert_engine_thread_only();

    let status = h.manager.status().await?.expect("interface attached");
    assert!(status.up);
    assert!(status.default);

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_init_twice_rejected() -> Result<()> {
    let mut h = Harness::new();
    h.manager.init().await?;

    let err = h.manager.init().await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            operation: "init",
            state: LifecycleState::Running
        }
    ));
    assert_eq!(h.net.ops(), BRING_UP);

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_reinit_sequence() -> Result<()> {
    let mut h = Harness::new();
    h.manager.init().await?;
    h.net.clear_ops();

    h.manager.reinit().await?;

    let expected: Vec<SimOp> = TEARDOWN.iter().chain(BRING_UP.iter()).copied().collect();
    assert_eq!(h.net.ops(), expected);
    assert_eq!(h.manager.state(), LifecycleState::Running);
    h.assert_engine_thread_only();

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_repeated_reinit_single_attach() -> Result<()> {
    let mut h = Harness::new();
    h.net.offer_lease(lease(5));
    h.manager.init().await?;

    for _ in 0..5 {
        h.manager.reinit().await?;
    }

    let ops = h.net.ops();
    assert_single_attach(&ops);
    let adds = ops.iter().filter(|op| **op == SimOp::AddInterface).count();
    assert_eq!(adds, 6);

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_reinit_before_init_rejected() {
    let mut h = Harness::new();
    let err = h.manager.reinit().await.unwrap_err();
    assert_eq!(err.to_string(), "reinit is not valid while uninitialized");
    assert!(h.net.ops().is_empty());
}

#[tokio::test]
async fn test_teardown_failures_tolerated() -> Result<()> {
    let mut h = Harness::new();
    h.manager.init().await?;
    h.net.clear_ops();

    h.net.fail_next(SimOp::DhcpStop);
    h.net.fail_next(SimOp::SetDown);
    h.manager.reinit().await?;

    assert_eq!(h.manager.state(), LifecycleState::Running);
    assert_single_attach(&h.net.ops());

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_removal_failure_faults() -> Result<()> {
    let mut h = Harness::new();
    h.manager.init().await?;
    h.net.clear_ops();

    h.net.fail_next(SimOp::RemoveInterface);
    assert!(h.manager.reinit().await.is_err());

    // Not recreated, still attached.
    assert_eq!(h.manager.state(), LifecycleState::Faulted);
    assert_eq!(h.net.ops(), TEARDOWN);
    assert!(h.manager.status().await?.is_some());

    h.net.clear_ops();
    h.manager.reinit().await?;

    let ops = h.net.ops();
    assert_eq!(&ops[..3], &[SimOp::DhcpStop, SimOp::RemoveInterface, SimOp::AddInterface]);
    assert_eq!(&ops[2..], BRING_UP);
    assert_eq!(h.manager.state(), LifecycleState::Running);

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_interrupted_reinit_recovered() -> Result<()> {
    let mut h = Harness::new();
    h.manager.init().await?;
    h.net.clear_ops();

    // Poll once, then drop the reinit mid-teardown.
    {
        let mut reinit = Box::pin(h.manager.reinit());
        let first = future::poll_fn(|cx| Poll::Ready(reinit.as_mut().poll(cx))).await;
        assert!(first.is_pending());
    }
    assert_eq!(h.manager.state(), LifecycleState::Reinitializing);

    h.manager.reinit().await?;
    assert_eq!(h.manager.state(), LifecycleState::Running);
    assert_single_attach(&h.net.ops());
    assert!(h.net.ops().ends_with(&BRING_UP));
    assert!(h.manager.status().await?.is_some());

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_bring_up_failure_recovered_by_reinit() -> Result<()> {
    let mut h = Harness::new();
    h.net.fail_next(SimOp::DhcpStart);

    let err = h.manager.init().await.unwrap_err();
    assert!(err.to_string().starts_with("dhcp_start: "));
    assert_eq!(h.manager.state(), LifecycleState::Faulted);
    assert!(matches!(
        h.manager.init().await,
        Err(Error::InvalidState { .. })
    ));

    h.manager.reinit().await?;
    assert_eq!(h.manager.state(), LifecycleState::Running);
    assert_single_attach(&h.net.ops());

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_link_local_policy() -> Result<()> {
    let mut h = Harness::with_config(ManagerConfig::new().link_local_preferred(false));
    h.manager.init().await?;

    assert!(
        h.net
            .ops()
            .contains(&SimOp::CreateIp6LinkLocal { preferred: false })
    );

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_shutdown_removes_interface() -> Result<()> {
    let mut h = Harness::new();
    h.manager.init().await?;
    h.net.clear_ops();

    h.manager.shutdown().await?;

    assert_eq!(h.net.ops(), TEARDOWN);
    assert_eq!(h.manager.state(), LifecycleState::Stopped);
    assert!(h.manager.engine().is_none());
    assert!(h.manager.reinit().await.is_err());
    Ok(())
}
