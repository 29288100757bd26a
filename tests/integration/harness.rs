//! Test harness wiring an engine to stub price sources.
//!
//! The `TestHarness` owns a manual clock, two scripted sources (primary and
//! secondary) and an engine built from [`test_config`].

use async_trait::async_trait;
use creditgate::pricing::SourceUnavailable;
use creditgate::{
    AssetSymbol, Charge, Clock, ConversionResult, CreditPackage, CreditRail, CurrencyId,
    CurrencyKind, Engine, EngineBuilder, EngineConfig, ExemptionEntry, IdentityKey, ManualClock,
    PackageId, PaymentCurrency, PriceQuote, PriceSource, RateLimitStore, ShareEntry, SourceTag,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Start of an hour-aligned rate limit window; the harness clock starts here.
pub const WINDOW_START: i64 = 1_699_999_200;

/// Scripted price source: serves a settable price, or fails when unset.
#[derive(Debug)]
pub struct StubSource {
    tag: SourceTag,
    price: Mutex<Option<Decimal>>,
    delay: Duration,
    calls: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl StubSource {
    /// Create a source answering `price` for every asset.
    pub fn new(tag: &str, price: Option<Decimal>, delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            tag: SourceTag::new(tag),
            price: Mutex::new(price),
            delay,
            calls: AtomicUsize::new(0),
            clock,
        }
    }

    /// Change the served price; `None` makes every fetch fail.
    pub fn set_price(&self, price: Option<Decimal>) {
        *self.price.lock() = price;
    }

    /// Number of fetches so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for StubSource {
    fn tag(&self) -> &SourceTag {
        &self.tag
    }

    async fn fetch(&self, asset: &AssetSymbol) -> Result<PriceQuote, SourceUnavailable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let price = *self.price.lock();
        price
            .map(|p| PriceQuote::new(asset.clone(), p, self.clock.now(), self.tag.clone()))
            .ok_or_else(|| SourceUnavailable {
                tag: self.tag.clone(),
                reason: "scripted outage".to_string(),
            })
    }
}

fn package(id: &str, usd: Decimal, primary: u64, bonus: u64) -> CreditPackage {
    CreditPackage {
        id: PackageId::new(id),
        usd_price: usd,
        primary_currency_credits: primary,
        bonus_currency_credits: bonus,
        active: true,
        min_tier_flags: BTreeSet::new(),
    }
}

/// Configuration shared by the integration tests.
///
/// - `usdc`: fixed, 6 decimals, primary rail
/// - `tok`: volatile (asset `TOK`), 18 decimals, bonus rail, fallback 0.20 USD
/// - 5 requests per hour; `0xops` is exempt and waived, `0xmonitor` only exempt
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.price.fallback.insert(AssetSymbol::new("TOK"), dec!(0.20));
    config.currencies = vec![
        PaymentCurrency {
            id: CurrencyId::new("usdc"),
            asset: AssetSymbol::new("USDC"),
            kind: CurrencyKind::Fixed,
            decimals: 6,
            credit_rail: CreditRail::Primary,
        },
        PaymentCurrency {
            id: CurrencyId::new("tok"),
            asset: AssetSymbol::new("TOK"),
            kind: CurrencyKind::Volatile,
            decimals: 18,
            credit_rail: CreditRail::Bonus,
        },
    ];
    config.packages = vec![
        package("starter", dec!(5.00), 750, 1000),
        package("pro", dec!(20.00), 3200, 4500),
        package("studio", dec!(50.00), 8500, 12500),
    ];
    config.distribution = vec![
        ShareEntry::new("treasury", dec!(15)),
        ShareEntry::new("creator", dec!(50)),
        ShareEntry::new("operations", dec!(25)),
        ShareEntry::new("referral", dec!(10)),
    ];
    config.rate_limit.max_requests = 5;
    config.rate_limit.window_secs = 3600;
    config.exemptions = vec![
        ExemptionEntry {
            identity: IdentityKey::new("0xOPS"),
            reason: "operator wallet".to_string(),
            waive_payment: true,
        },
        ExemptionEntry {
            identity: IdentityKey::new("0xmonitor"),
            reason: "uptime probe".to_string(),
            waive_payment: false,
        },
    ];
    config
}

/// Engine plus the knobs tests turn.
pub struct TestHarness {
    /// Engine under test.
    pub engine: Arc<Engine>,
    /// Clock shared by the engine and the sources.
    pub clock: ManualClock,
    /// First source in the chain (0.25 USD by default).
    pub primary: Arc<StubSource>,
    /// Second source in the chain (0.30 USD by default).
    pub secondary: Arc<StubSource>,
}

impl TestHarness {
    /// Harness over [`test_config`] with instant sources.
    pub fn setup() -> Self {
        Self::setup_with(test_config(), Duration::ZERO, None)
    }

    /// Harness whose primary source takes `delay` per fetch.
    pub fn setup_with_delay(delay: Duration) -> Self {
        Self::setup_with(test_config(), delay, None)
    }

    /// Fully parameterized harness.
    pub fn setup_with(
        config: EngineConfig,
        primary_delay: Duration,
        store: Option<Arc<dyn RateLimitStore>>,
    ) -> Self {
        let clock = ManualClock::at_unix(WINDOW_START);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());

        let primary = Arc::new(StubSource::new(
            "primary",
            Some(dec!(0.25)),
            primary_delay,
            Arc::clone(&shared),
        ));
        let secondary = Arc::new(StubSource::new(
            "secondary",
            Some(dec!(0.30)),
            Duration::ZERO,
            Arc::clone(&shared),
        ));

        let mut builder = EngineBuilder::new(config)
            .with_clock(shared)
            .with_sources(vec![
                Arc::clone(&primary) as Arc<dyn PriceSource>,
                Arc::clone(&secondary) as Arc<dyn PriceSource>,
            ]);
        if let Some(store) = store {
            builder = builder.with_store(store);
        }

        Self {
            engine: Arc::new(builder.build().expect("engine builds")),
            clock,
            primary,
            secondary,
        }
    }

    /// Quote `package` in `currency` for `identity`.
    pub async fn quote(
        &self,
        identity: &str,
        package: &str,
        currency: &str,
    ) -> creditgate::Result<Charge> {
        self.engine
            .quote(
                &IdentityKey::new(identity),
                &PackageId::new(package),
                &CurrencyId::new(currency),
            )
            .await
    }

    /// Take both sources down.
    pub fn outage(&self) {
        self.primary.set_price(None);
        self.secondary.set_price(None);
    }
}

/// Unwrap a payable charge.
pub fn payable(charge: Charge) -> ConversionResult {
    match charge {
        Charge::Payable(conversion) => conversion,
        Charge::Waived { package, .. } => panic!("expected a payable charge for {package}"),
    }
}
