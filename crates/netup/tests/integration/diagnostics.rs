//! Diagnostics integration tests.

use netup::{LifecycleState, Result};

use crate::common::{Harness, lease};

#[tokio::test]
async fn test_debug_before_address() -> Result<()> {
    let mut h = Harness::new();
    h.manager.init().await?;

    let diagnostics = h.manager.debug().await;

    let status = diagnostics.status.as_ref().expect("interface attached");
    assert!(!status.ipv4.is_assigned());
    assert_eq!(diagnostics.stack.interfaces_added, 1);
    assert_eq!(diagnostics.stack.dhcp.starts, 1);
    assert_eq!(diagnostics.stack.dhcp.leases, 0);
    assert!(diagnostics.engine.jobs >= 1);
    assert!(diagnostics.to_string().contains("ip4: 0.0.0.0/0"));

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_debug_counts_reinit() -> Result<()> {
    let mut h = Harness::new();
    h.net.offer_lease(lease(5));
    h.manager.init().await?;
    h.next_lines(2).await;
    h.manager.reinit().await?;
    h.next_lines(2).await;

    let diagnostics = h.manager.debug().await;
    let stack = &diagnostics.stack;
    assert_eq!(stack.interfaces_added, 2);
    assert_eq!(stack.interfaces_removed, 1);
    assert_eq!(stack.dhcp.starts, 2);
    assert_eq!(stack.dhcp.stops, 1);
    assert_eq!(stack.dhcp.leases, 2);
    assert!(stack.link.total_frames() > 0);
    assert!(diagnostics.engine.status_notifications >= 4);

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_debug_any_time() -> Result<()> {
    let mut h = Harness::new();
    assert_eq!(h.manager.state(), LifecycleState::Uninitialized);
    let before = h.manager.debug().await;
    assert!(before.status.is_none());
    assert_eq!(before.stack.interfaces_added, 0);
    assert_eq!(before.engine.jobs, 0);

    h.net.offer_lease(lease(5));
    h.manager.init().await?;
    h.next_lines(2).await;
    h.manager.shutdown().await?;

    let after = h.manager.debug().await;
    assert_eq!(h.manager.state(), LifecycleState::Stopped);
    assert!(after.status.is_none());
    assert_eq!(after.stack.interfaces_added, 1);
    assert_eq!(after.stack.interfaces_removed, 1);
    assert_eq!(after.stack.dhcp.leases, 1);
    assert!(after.to_string().contains("state: detached"));
    Ok(())
}
