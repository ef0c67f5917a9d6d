//! Contract Test: State Reconciliation Idempotency
//!
//! Constraints verified:
//! - Applying the same router tables twice yields the same registry
//! - Devices absent from the tables end with every transient flag cleared
//! - Router rows for unregistered MACs are ignored
//! - Identity, credential and expiry fields are never touched

mod common;

use common::*;
use nasauth_core::device::Device;
use nasauth_core::engine::ReconcileReport;

async fn snapshot(h: &Harness) -> Vec<Device> {
    let mut devices = h.engine.registry().scan_all().await;
    devices.sort_by(|a, b| a.mac.cmp(&b.mac));
    devices
}

#[tokio::test]
async fn same_tables_same_registry() {
    let h = Harness::new(vec![
        entry("alice", "pw", 24, &["AA:AA", "AA:BB"]),
        entry("bob", "pw", 24, &["BB:BB"]),
    ]);
    h.engine.full_resync().await.unwrap();
    h.router.set_online(vec![online("AA:AA", "10.0.0.5"), online("BB:BB", "10.0.0.6")]);
    h.router.set_authenticated(vec![mac("BB:BB")]);

    let first = h.engine.reconcile_state().await.unwrap();
    let after_first = snapshot(&h).await;

    let second = h.engine.reconcile_state().await.unwrap();
    let after_second = snapshot(&h).await;

    assert_eq!(first, second);
    assert_eq!(after_first, after_second);
    assert_eq!(
        first,
        ReconcileReport {
            online: 2,
            authenticated: 1
        }
    );
}

#[tokio::test]
async fn devices_missing_from_tables_are_reset() {
    let h = Harness::new(vec![entry("alice", "pw", 24, &["AA:AA"])]);
    h.engine.full_resync().await.unwrap();

    h.router.set_online(vec![online("AA:AA", "10.0.0.5")]);
    h.router.set_authenticated(vec![mac("AA:AA")]);
    h.engine.reconcile_state().await.unwrap();

    let device = h.engine.registry().get(&mac("AA:AA")).await.unwrap();
    assert!(device.online && device.auth);

    // Device left the network
    h.router.set_online(vec![]);
    h.router.set_authenticated(vec![]);
    h.engine.reconcile_state().await.unwrap();

    let device = h.engine.registry().get(&mac("AA:AA")).await.unwrap();
    assert!(!device.online);
    assert!(!device.auth);
    assert_eq!(device.ip, None, "stale IP must not survive");
}

#[tokio::test]
async fn unknown_router_rows_are_ignored() {
    let h = Harness::new(vec![entry("alice", "pw", 24, &["AA:AA"])]);
    h.engine.full_resync().await.unwrap();

    h.router.set_online(vec![online("FF:FF", "10.0.0.99")]);
    h.router.set_authenticated(vec![mac("FF:FF")]);

    let report = h.engine.reconcile_state().await.unwrap();
    assert_eq!(report, ReconcileReport::default());
    assert!(h.engine.registry().get(&mac("FF:FF")).await.is_none());
    assert_eq!(h.engine.registry().len().await, 1);
}

#[tokio::test]
async fn identity_fields_are_untouched() {
    let h = Harness::new(vec![entry("alice", "secret", 24, &["AA:AA"])]);
    h.engine.full_resync().await.unwrap();
    let before = h.engine.registry().get(&mac("AA:AA")).await.unwrap();

    h.router.set_online(vec![online("aa-aa", "10.0.0.5")]);
    h.engine.reconcile_state().await.unwrap();

    let after = h.engine.registry().get(&mac("AA:AA")).await.unwrap();
    assert_eq!(after.name, before.name);
    assert_eq!(after.password, before.password);
    assert_eq!(after.expired_at, before.expired_at);
    assert!(after.online, "router MAC matched after normalization");
}
