//! Pricing flow: package + currency to a charge, through the quote cache.

use super::{payable, TestHarness};
use creditgate::{EngineEvent, Error, PackageId, SourceTag};
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn test_volatile_quote_converts_at_primary_price() {
    let harness = TestHarness::setup();

    let conversion = payable(harness.quote("0xa11ce", "starter", "tok").await.unwrap());

    // 5.00 USD at 0.25 USD/TOK
    assert_eq!(conversion.required_native_amount, dec!(20));
    assert_eq!(conversion.credits_granted, 1000);
    assert_eq!(conversion.quote_used.source, SourceTag::new("primary"));
    assert_eq!(harness.primary.calls(), 1);
    assert_eq!(harness.secondary.calls(), 0);
}

#[tokio::test]
async fn test_inexact_price_rounds_up_to_smallest_unit() {
    let harness = TestHarness::setup();
    harness.primary.set_price(Some(dec!(0.2637)));

    let conversion = payable(harness.quote("0xa11ce", "starter", "tok").await.unwrap());
    let amount = conversion.required_native_amount;

    // 5 / 0.2637 = 18.960940462646947288585513841...
    assert_eq!(amount, dec!(18.960940462646947289));
    assert!(amount.scale() <= 18);
    assert!(amount * dec!(0.2637) >= dec!(5.00));
}

#[tokio::test]
async fn test_fixed_currency_never_calls_oracle() {
    let harness = TestHarness::setup();

    let conversion = payable(harness.quote("0xa11ce", "starter", "usdc").await.unwrap());

    assert_eq!(conversion.required_native_amount, dec!(5.00));
    assert_eq!(conversion.credits_granted, 750);
    assert_eq!(conversion.quote_used.source, SourceTag::new(SourceTag::NOMINAL));
    assert_eq!(harness.primary.calls(), 0);
}

#[tokio::test]
async fn test_same_usd_grants_more_credits_on_bonus_rail() {
    let harness = TestHarness::setup();

    for package in ["starter", "pro", "studio"] {
        let primary = harness.quote("0xa11ce", package, "usdc").await.unwrap();
        let bonus = harness.quote("0xb0b", package, "tok").await.unwrap();
        assert!(
            bonus.credits_granted() > primary.credits_granted(),
            "package {package}"
        );
    }
}

#[tokio::test]
async fn test_secondary_serves_when_primary_down() {
    let harness = TestHarness::setup();
    harness.primary.set_price(None);

    let conversion = payable(harness.quote("0xa11ce", "starter", "tok").await.unwrap());

    assert_eq!(conversion.quote_used.source, SourceTag::new("secondary"));
    assert_eq!(conversion.quote_used.unit_price_usd, dec!(0.30));
    // 5 / 0.30 = 16.666..., rounded up at 18 decimals
    assert_eq!(conversion.required_native_amount, dec!(16.666666666666666667));
    assert_eq!(harness.primary.calls(), 1);
    assert_eq!(harness.secondary.calls(), 1);
}

#[tokio::test]
async fn test_full_outage_on_cold_cache_uses_fallback() {
    let harness = TestHarness::setup();
    let mut events = harness.engine.subscribe_events();
    harness.outage();

    let conversion = payable(harness.quote("0xa11ce", "starter", "tok").await.unwrap());

    assert!(conversion.quote_used.source.is_fallback());
    assert_eq!(conversion.quote_used.unit_price_usd, dec!(0.20));
    assert_eq!(conversion.required_native_amount, dec!(25));
    assert_eq!(harness.engine.cache_stats().fallback_served, 1);
    assert!(matches!(
        events.try_recv(),
        Ok(EngineEvent::FallbackQuoteUsed { .. })
    ));

    // The fallback is never cached; recovery shows once the failure expires.
    harness.primary.set_price(Some(dec!(0.25)));
    harness.clock.advance(Duration::from_secs(5));
    let conversion = payable(harness.quote("0xa11ce", "starter", "tok").await.unwrap());
    assert_eq!(conversion.quote_used.source, SourceTag::new("primary"));
}

#[tokio::test]
async fn test_stale_quote_preferred_over_fallback() {
    let harness = TestHarness::setup();
    harness.quote("0xa11ce", "starter", "tok").await.unwrap();

    harness.outage();
    harness.clock.advance(Duration::from_secs(600));

    let conversion = payable(harness.quote("0xa11ce", "starter", "tok").await.unwrap());
    assert_eq!(conversion.quote_used.source, SourceTag::new("primary"));
    assert_eq!(conversion.quote_used.unit_price_usd, dec!(0.25));
    assert_eq!(harness.engine.cache_stats().stale_served, 1);
}

#[tokio::test]
async fn test_quote_reused_within_ttl() {
    let harness = TestHarness::setup();

    harness.quote("0xa11ce", "starter", "tok").await.unwrap();
    harness.clock.advance(Duration::from_secs(30));
    harness.quote("0xa11ce", "pro", "tok").await.unwrap();
    assert_eq!(harness.primary.calls(), 1);

    harness.clock.advance(Duration::from_secs(1));
    harness.quote("0xa11ce", "studio", "tok").await.unwrap();
    assert_eq!(harness.primary.calls(), 2);
}

#[tokio::test]
async fn test_concurrent_cold_quotes_share_one_fetch() {
    let harness = TestHarness::setup_with_delay(Duration::from_millis(50));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let engine = std::sync::Arc::clone(&harness.engine);
            tokio::spawn(async move {
                engine
                    .quote(
                        &format!("0xbuyer{i}").into(),
                        &"starter".into(),
                        &"tok".into(),
                    )
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        let conversion = payable(result.unwrap().unwrap());
        assert_eq!(conversion.required_native_amount, dec!(20));
    }

    assert_eq!(harness.primary.calls(), 1);
    let stats = harness.engine.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 15);
}

#[tokio::test]
async fn test_concurrent_quotes_during_outage_share_one_pass() {
    let harness = TestHarness::setup_with_delay(Duration::from_millis(50));
    harness.outage();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let engine = std::sync::Arc::clone(&harness.engine);
            tokio::spawn(async move {
                engine
                    .quote(
                        &format!("0xbuyer{i}").into(),
                        &"starter".into(),
                        &"tok".into(),
                    )
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        let conversion = payable(result.unwrap().unwrap());
        assert!(conversion.quote_used.source.is_fallback());
        assert_eq!(conversion.required_native_amount, dec!(25));
    }

    assert_eq!(harness.primary.calls(), 1);
    assert_eq!(harness.secondary.calls(), 1);
    let stats = harness.engine.cache_stats();
    assert_eq!(stats.upstream_fetches, 2);
    assert_eq!(stats.fallback_served, 8);
}

#[tokio::test]
async fn test_warm_prices_fills_cache() {
    let harness = TestHarness::setup();

    assert_eq!(harness.engine.warm_prices().await, 1);
    harness.quote("0xa11ce", "starter", "tok").await.unwrap();

    assert_eq!(harness.primary.calls(), 1);
    assert_eq!(harness.engine.cache_stats().hits, 1);
}

#[tokio::test]
async fn test_inactive_package_not_quotable() {
    let harness = TestHarness::setup();
    let pro = PackageId::new("pro");

    harness.engine.catalog().set_active(&pro, false).unwrap();

    let err = harness.quote("0xa11ce", "pro", "usdc").await.unwrap_err();
    assert!(matches!(err, Error::PackageNotFound(ref id) if *id == pro));
    assert_eq!(err.user_message(), "package pro is not available");
    assert_eq!(harness.engine.packages().len(), 2);
}

#[tokio::test]
async fn test_unknown_currency() {
    let harness = TestHarness::setup();

    let err = harness.quote("0xa11ce", "starter", "doge").await.unwrap_err();
    assert!(matches!(err, Error::UnknownCurrency(_)));
    assert!(err.is_user_error());
}

#[tokio::test]
async fn test_no_price_anywhere_is_unavailable() {
    let mut config = super::test_config();
    config.price.fallback.clear();
    let harness = TestHarness::setup_with(config, Duration::ZERO, None);
    harness.outage();

    let err = harness.quote("0xa11ce", "starter", "tok").await.unwrap_err();
    assert!(matches!(err, Error::PricingUnavailable { .. }));
    assert_eq!(err.user_message(), "pricing temporarily unavailable");
}
