//! Per-identity throttling through the engine.

use super::{test_config, TestHarness, WINDOW_START};
use chrono::DateTime;
use creditgate::{
    Admission, Charge, EngineEvent, Error, IdentityKey, InMemoryStore, RateLimitStore,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_cap_then_denied_until_window_closes() {
    let harness = TestHarness::setup();
    let reset_at = DateTime::from_timestamp(WINDOW_START + 3600, 0).unwrap();

    for _ in 0..5 {
        harness.quote("0xa11ce", "starter", "usdc").await.unwrap();
    }
    let err = harness.quote("0xa11ce", "starter", "usdc").await.unwrap_err();

    assert!(matches!(err, Error::RateLimitExceeded { reset_at: r } if r == reset_at));
    assert!(err.user_message().contains(&reset_at.to_rfc3339()));
    assert_eq!(
        harness.engine.status(&IdentityKey::new("0xA11CE")),
        Admission::Denied { reset_at }
    );

    // Other identities are unaffected.
    harness.quote("0xb0b", "starter", "usdc").await.unwrap();

    harness.clock.advance(Duration::from_secs(3600));
    harness.quote("0xa11ce", "starter", "usdc").await.unwrap();
}

#[tokio::test]
async fn test_remaining_counts_down() {
    let harness = TestHarness::setup();
    let id = IdentityKey::new("0xa11ce");

    let remaining: Vec<u32> = (0..5)
        .map(|_| match harness.engine.admit(&id) {
            Admission::Admitted { remaining, .. } => remaining,
            Admission::Denied { .. } => panic!("denied early"),
        })
        .collect();

    assert_eq!(remaining, [4, 3, 2, 1, 0]);
    assert!(!harness.engine.admit(&id).is_admitted());
}

#[tokio::test]
async fn test_denied_request_never_reaches_oracle() {
    let harness = TestHarness::setup();

    for _ in 0..5 {
        harness.quote("0xa11ce", "starter", "usdc").await.unwrap();
    }
    let err = harness.quote("0xa11ce", "starter", "tok").await.unwrap_err();

    assert!(matches!(err, Error::RateLimitExceeded { .. }));
    assert_eq!(harness.primary.calls(), 0);
}

#[tokio::test]
async fn test_exempt_identity_is_never_counted() {
    let harness = TestHarness::setup();

    for _ in 0..20 {
        let charge = harness.quote("0xmonitor", "starter", "usdc").await.unwrap();
        assert!(!charge.is_waived());
    }

    assert!(matches!(
        harness.engine.status(&IdentityKey::new("0xmonitor")),
        Admission::Admitted { remaining: 5, .. }
    ));
}

#[tokio::test]
async fn test_waived_identity_gets_credits_without_payment() {
    let harness = TestHarness::setup();
    let mut events = harness.engine.subscribe_events();

    let charge = harness.quote("0xOps", "studio", "tok").await.unwrap();

    assert_eq!(
        charge,
        Charge::Waived {
            package: "studio".into(),
            currency: "tok".into(),
            credits_granted: 12500,
        }
    );
    assert_eq!(harness.primary.calls(), 0);
    assert_eq!(
        events.try_recv().unwrap(),
        EngineEvent::PaymentWaived {
            identity: IdentityKey::new("0xops"),
            package: "studio".into(),
        }
    );

    // Waiving does not bypass catalog checks.
    assert!(matches!(
        harness.quote("0xops", "enterprise", "tok").await,
        Err(Error::PackageNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admissions_never_exceed_cap() {
    let harness = TestHarness::setup();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let engine = Arc::clone(&harness.engine);
            tokio::spawn(async move { engine.admit(&IdentityKey::new("0xa11ce")).is_admitted() })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5);
}

#[tokio::test]
async fn test_engines_sharing_a_store_share_the_cap() {
    let store: Arc<dyn RateLimitStore> = Arc::new(InMemoryStore::new());
    let a = TestHarness::setup_with(test_config(), Duration::ZERO, Some(Arc::clone(&store)));
    let b = TestHarness::setup_with(test_config(), Duration::ZERO, Some(Arc::clone(&store)));

    for _ in 0..3 {
        a.quote("0xa11ce", "starter", "usdc").await.unwrap();
    }
    for _ in 0..2 {
        b.quote("0xa11ce", "starter", "usdc").await.unwrap();
    }

    assert!(a.quote("0xa11ce", "starter", "usdc").await.is_err());
    assert!(b.quote("0xa11ce", "starter", "usdc").await.is_err());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_sweeper_drops_expired_records() {
    let harness = TestHarness::setup();
    let mut events = harness.engine.subscribe_events();

    harness.engine.admit(&IdentityKey::new("0xa11ce"));
    harness.engine.admit(&IdentityKey::new("0xb0b"));
    harness.clock.advance(Duration::from_secs(7200));

    let maintenance = harness.engine.spawn_maintenance();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("sweep ran")
        .unwrap();
    assert_eq!(event, EngineEvent::RecordsSwept { removed: 2 });

    maintenance.shutdown().await;
}
