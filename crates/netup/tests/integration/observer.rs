//! Address reporting integration tests.

use netup::{AddressEvent, Result};
use std::time::Duration;
use tokio_stream::StreamExt;

use crate::common::{Harness, lease};

#[tokio::test]
async fn test_dhcp_address_reported_once() -> Result<()> {
    let mut h = Harness::new();
    h.net.set_link_local_id(1);
    h.net.offer_lease(lease(5));
    h.manager.init().await?;

    let lines = h.next_lines(2).await;
    assert_eq!(
        lines,
        vec![
            "ip4_addr: 10.0.0.5 netmask: 255.255.255.0 gw: 10.0.0.1",
            "ip6_addr[0]: fe80::1",
        ]
    );
    assert!(h.manager.tracker().ipv4_reported());
    assert!(h.manager.tracker().ipv6_reported(0));

    // Status changes again without new addresses.
    let engine = h.manager.engine().expect("engine running").clone();
    engine.call(|core| core.set_down()).await??;
    engine.call(|core| core.set_up()).await??;
    h.assert_quiet().await;

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_lease_after_init() -> Result<()> {
    let mut h = Harness::new();
    h.net.set_link_local_id(1);
    h.manager.init().await?;

    assert_eq!(h.next_event().await.to_string(), "ip6_addr[0]: fe80::1");
    h.assert_quiet().await;
    assert!(!h.manager.tracker().ipv4_reported());

    h.net.offer_lease(lease(5));
    assert_eq!(
        h.next_event().await.to_string(),
        "ip4_addr: 10.0.0.5 netmask: 255.255.255.0 gw: 10.0.0.1"
    );

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_reinit_reports_again() -> Result<()> {
    let mut h = Harness::new();
    h.net.set_link_local_id(1);
    h.net.offer_lease(lease(5));
    h.manager.init().await?;
    h.next_lines(2).await;

    h.net.offer_lease(lease(7));
    h.manager.reinit().await?;

    let lines = h.next_lines(2).await;
    assert_eq!(
        lines,
        vec![
            "ip4_addr: 10.0.0.7 netmask: 255.255.255.0 gw: 10.0.0.1",
            "ip6_addr[0]: fe80::1",
        ]
    );
    h.assert_quiet().await;

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_lease_renewal_within_epoch_silent() -> Result<()> {
    let mut h = Harness::new();
    h.net.offer_lease(lease(5));
    h.manager.init().await?;
    h.next_lines(2).await;

    h.net.withdraw_lease();
    h.settle().await;
    let status = h.manager.status().await?.expect("interface attached");
    assert!(!status.ipv4.is_assigned());

    h.net.offer_lease(lease(9));
    h.assert_quiet().await;
    let status = h.manager.status().await?.expect("interface attached");
    assert_eq!(status.ipv4.address.octets(), [10, 0, 0, 9]);

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_tentative_link_local_reported_when_preferred() -> Result<()> {
    let mut h = Harness::with_config(netup::ManagerConfig::new().link_local_preferred(false));
    h.net.set_link_local_id(1);
    h.net.set_dad_polls(3);
    h.manager.init().await?;

    let event = h.next_event().await;
    assert_eq!(
        event,
        AddressEvent::Ipv6Preferred {
            slot: 0,
            address: "fe80::1".parse().unwrap(),
        }
    );

    h.manager.shutdown().await
}

#[tokio::test]
async fn test_event_stream() -> Result<()> {
    let mut h = Harness::new();
    let mut events = h.manager.events();
    h.net.offer_lease(lease(5));
    h.manager.init().await?;

    let mut ipv4 = None;
    while ipv4.is_none() {
        let event = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .expect("event within timeout")
            .expect("stream open");
        if let AddressEvent::Ipv4Assigned(settings) = event {
            ipv4 = Some(settings);
        }
    }

    let settings = ipv4.unwrap();
    assert_eq!(settings.prefix_len(), 24);
    assert_eq!(settings.gateway().map(|gw| gw.octets()), Some([10, 0, 0, 1]));

    h.manager.shutdown().await
}
