//! Engine implementation: composes pricing, catalog, distribution and
//! throttling behind the operations a route layer calls.

use crate::catalog::{CreditCatalog, CreditPackage};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::distribution::{DistributionPlan, ShareTable};
use crate::error::Result;
use crate::event::{create_event_channel, EngineEvent, EngineEventsChannel, EngineEventsSender};
use crate::limiter::{Admission, InMemoryStore, RateLimitStore, RateLimiter};
use crate::pricing::{
    CacheStats, ConversionResult, CurrencyKind, HttpPriceSource, PriceCache, PriceSource,
    PricingEngine,
};
use crate::types::{AssetSymbol, CurrencyId, IdentityKey, PackageId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What a caller owes for a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "charge", rename_all = "snake_case")]
pub enum Charge {
    /// Pay the converted amount.
    Payable(ConversionResult),
    /// Exempt identity; credits are granted without payment.
    Waived {
        /// Package granted.
        package: PackageId,
        /// Currency the request named.
        currency: CurrencyId,
        /// Credits on that currency's rail.
        credits_granted: u64,
    },
}

impl Charge {
    /// Credits the purchase grants.
    #[must_use]
    pub fn credits_granted(&self) -> u64 {
        match self {
            Self::Payable(conversion) => conversion.credits_granted,
            Self::Waived {
                credits_granted, ..
            } => *credits_granted,
        }
    }

    /// Amount to collect, zero when waived.
    #[must_use]
    pub fn amount_due(&self) -> Decimal {
        match self {
            Self::Payable(conversion) => conversion.required_native_amount,
            Self::Waived { .. } => Decimal::ZERO,
        }
    }

    /// Check if payment was waived.
    #[must_use]
    pub fn is_waived(&self) -> bool {
        matches!(self, Self::Waived { .. })
    }
}

/// Builder for constructing an engine.
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    sources: Option<Vec<Arc<dyn PriceSource>>>,
    store: Option<Arc<dyn RateLimitStore>>,
}

impl EngineBuilder {
    /// Create a new engine builder with the given configuration.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: None,
            sources: None,
            store: None,
        }
    }

    /// Use `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use `sources` instead of the HTTP providers in the configuration.
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<Arc<dyn PriceSource>>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Keep rate limit records in `store` instead of process memory.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration and assemble the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or an HTTP client
    /// cannot be created.
    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        let source_count = self
            .sources
            .as_ref()
            .map_or(config.price.sources.len(), Vec::len);
        config.validate_with_sources(source_count)?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let timeout = Duration::from_secs(config.price.timeout_secs);

        let sources = match self.sources {
            Some(sources) => sources,
            None => config
                .price
                .sources
                .iter()
                .map(|source| {
                    HttpPriceSource::new(source.clone(), timeout, Arc::clone(&clock))
                        .map(|s| Arc::new(s) as Arc<dyn PriceSource>)
                })
                .collect::<Result<Vec<_>>>()?,
        };
        let source_tags: Vec<_> = sources.iter().map(|s| s.tag().to_string()).collect();

        let cache = Arc::new(
            PriceCache::new(sources, Arc::clone(&clock))
                .with_ttl(Duration::from_secs(config.price.ttl_secs))
                .with_failure_ttl(Duration::from_secs(config.price.failure_ttl_secs))
                .with_fallbacks(config.price.fallback.clone()),
        );
        let catalog = Arc::new(CreditCatalog::new(config.packages.clone())?);
        let pricing = PricingEngine::new(
            Arc::clone(&catalog),
            config.currencies.clone(),
            Arc::clone(&cache),
            Arc::clone(&clock),
        )?;
        let shares = ShareTable::new(config.distribution.clone())?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let limiter = Arc::new(RateLimiter::new(
            &config.rate_limit,
            config.exemptions.clone(),
            store,
            Arc::clone(&clock),
        )?);

        let (events_tx, _) = create_event_channel();

        info!(
            "Engine ready: {} packages, {} currencies, sources [{}], {} requests per {}s",
            catalog.len(),
            config.currencies.len(),
            source_tags.join(", "),
            config.rate_limit.max_requests,
            config.rate_limit.window_secs
        );

        Ok(Engine {
            catalog,
            cache,
            pricing,
            shares,
            limiter,
            events_tx,
            sweep_interval: Duration::from_secs(config.rate_limit.sweep_interval_secs),
        })
    }
}

/// Pricing, credit and throttling engine.
///
/// Holds no per-request state of its own; share it behind an `Arc`.
#[derive(Debug)]
pub struct Engine {
    catalog: Arc<CreditCatalog>,
    cache: Arc<PriceCache>,
    pricing: PricingEngine,
    shares: ShareTable,
    limiter: Arc<RateLimiter>,
    events_tx: EngineEventsSender,
    sweep_interval: Duration,
}

impl Engine {
    /// Count a request for `identity` against its rate limit.
    pub fn admit(&self, identity: &IdentityKey) -> Admission {
        let admission = self.limiter.admit(identity);
        if let Admission::Denied { reset_at } = admission {
            let _ = self.events_tx.send(EngineEvent::Throttled {
                identity: identity.clone(),
                reset_at,
            });
        }
        admission
    }

    /// Current rate limit standing of `identity`, without counting.
    #[must_use]
    pub fn status(&self, identity: &IdentityKey) -> Admission {
        self.limiter.status(identity)
    }

    /// Admit the request, then price `package_id` in `currency_id`.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::RateLimitExceeded`] if the identity is over its cap
    /// - [`crate::Error::PackageNotFound`] / [`crate::Error::UnknownCurrency`] for bad input
    /// - [`crate::Error::PricingUnavailable`] if the currency cannot be priced
    pub async fn quote(
        &self,
        identity: &IdentityKey,
        package_id: &PackageId,
        currency_id: &CurrencyId,
    ) -> Result<Charge> {
        self.admit(identity).into_result()?;

        if let Some(exemption) = self
            .limiter
            .exemption(identity)
            .filter(|entry| entry.waive_payment)
        {
            let package = self.catalog.get(package_id)?;
            let currency = self.pricing.currency(currency_id)?;
            info!(
                "Payment for {} waived for {} ({})",
                package.id, identity, exemption.reason
            );
            let _ = self.events_tx.send(EngineEvent::PaymentWaived {
                identity: identity.clone(),
                package: package.id.clone(),
            });
            return Ok(Charge::Waived {
                credits_granted: package.credits_for(currency.credit_rail),
                package: package.id,
                currency: currency.id.clone(),
            });
        }

        let conversion = self
            .pricing
            .required_native_amount(package_id, currency_id)
            .await?;

        if conversion.quote_used.source.is_fallback() {
            let _ = self.events_tx.send(EngineEvent::FallbackQuoteUsed {
                asset: conversion.quote_used.asset.clone(),
            });
        }

        Ok(Charge::Payable(conversion))
    }

    /// Split a received payment across the configured recipients.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownCurrency`] for an unconfigured currency and
    /// [`crate::Error::InvalidAmount`] for a negative or over-precise total.
    pub fn settle(&self, total: Decimal, currency_id: &CurrencyId) -> Result<DistributionPlan> {
        let currency = self.pricing.currency(currency_id)?;
        let plan = self.shares.split(total, currency.decimals)?;
        debug!(
            "Settled {} {} across {} recipients",
            total,
            currency.id,
            plan.shares.len()
        );
        Ok(plan)
    }

    /// Active packages in display order.
    #[must_use]
    pub fn packages(&self) -> Vec<CreditPackage> {
        self.catalog.list()
    }

    /// The package catalog, for administrative changes.
    #[must_use]
    pub fn catalog(&self) -> &CreditCatalog {
        &self.catalog
    }

    /// Quote cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Fetch every volatile currency's price once so the first buyers hit a
    /// warm cache. Returns how many assets were priced.
    pub async fn warm_prices(&self) -> usize {
        let assets: BTreeSet<AssetSymbol> = self
            .pricing
            .currencies()
            .filter(|c| c.kind == CurrencyKind::Volatile)
            .map(|c| c.asset.clone())
            .collect();

        let results =
            futures::future::join_all(assets.iter().map(|a| self.cache.get_price_default(a)))
                .await;

        let priced = results.iter().filter(|r| r.is_ok()).count();
        if priced < assets.len() {
            warn!("Warmed {} of {} asset prices", priced, assets.len());
        } else {
            info!("Warmed {} asset prices", priced);
        }
        priced
    }

    /// Subscribe to engine events.
    #[must_use]
    pub fn subscribe_events(&self) -> EngineEventsChannel {
        self.events_tx.subscribe()
    }

    /// Start the background task that sweeps expired rate limit records.
    ///
    /// The task stops when the returned handle is shut down or dropped.
    #[must_use]
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        let limiter = Arc::clone(&self.limiter);
        let events_tx = self.events_tx.clone();
        let period = self.sweep_interval;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            let _ = events_tx.send(EngineEvent::RecordsSwept { removed });
                        }
                    }
                }
            }

            let _ = events_tx.send(EngineEvent::MaintenanceStopped);
            debug!("Maintenance task stopped");
        });

        info!("Rate limit sweeper running every {:?}", period);
        MaintenanceHandle { shutdown_tx, task }
    }
}

/// Handle to the background maintenance task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("Maintenance task ended abnormally: {}", e);
        }
    }
}
