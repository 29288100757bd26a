//! TTL cache of price quotes in front of the source fallback chain.
//!
//! Each asset has its own slot guarded by an async mutex. A caller that finds
//! the slot stale fetches while holding it, so concurrent misses for the same
//! asset queue behind a single upstream call and then read its result. Misses
//! for different assets never wait on each other.
//!
//! A chain where every source failed is remembered in the slot too. Callers
//! that queued behind the failed attempt, or arrive within the failure TTL,
//! get the same degraded answer (stale quote, fallback or error) without
//! going upstream again.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::pricing::quote::PriceQuote;
use crate::pricing::source::PriceSource;
use crate::types::AssetSymbol;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Default quote TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Default time a failed source chain is reused before sources are retried.
pub const DEFAULT_FAILURE_TTL: Duration = Duration::from_secs(5);

/// How a failed chain was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Degraded {
    Stale,
    Fallback,
    Unavailable,
}

/// Outcome of the last chain where every source failed.
#[derive(Debug, Clone)]
struct FailedAttempt {
    finished_at: DateTime<Utc>,
    answer: Degraded,
    quote: Option<PriceQuote>,
}

#[derive(Debug, Default)]
struct SlotState {
    quote: Option<PriceQuote>,
    failure: Option<FailedAttempt>,
}

#[derive(Debug, Default)]
struct SlotEntry {
    /// Failed chains completed in this slot; bumped while holding `state`.
    failed_attempts: AtomicU64,
    state: AsyncMutex<SlotState>,
}

type Slot = Arc<SlotEntry>;

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from a fresh cached quote.
    pub hits: u64,
    /// Requests that had to consult the source chain.
    pub misses: u64,
    /// Upstream calls made, successful or not.
    pub upstream_fetches: u64,
    /// Upstream calls that failed.
    pub upstream_failures: u64,
    /// Requests answered with an expired quote because every source failed.
    pub stale_served: u64,
    /// Requests answered from the static fallback table.
    pub fallback_served: u64,
    /// Misses answered from a recent failed chain without going upstream.
    pub failures_reused: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Process-wide quote cache with an ordered fallback chain.
#[derive(Debug)]
pub struct PriceCache {
    sources: Vec<Arc<dyn PriceSource>>,
    fallbacks: HashMap<AssetSymbol, Decimal>,
    slots: Mutex<HashMap<AssetSymbol, Slot>>,
    ttl: Duration,
    failure_ttl: Duration,
    clock: Arc<dyn Clock>,
    stats: Mutex<CacheStats>,
}

impl PriceCache {
    /// Create a cache over `sources`, tried in order on every miss.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn PriceSource>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sources,
            fallbacks: HashMap::new(),
            slots: Mutex::new(HashMap::new()),
            ttl: DEFAULT_TTL,
            failure_ttl: DEFAULT_FAILURE_TTL,
            clock,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Set the TTL used by [`PriceCache::get_price_default`].
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set how long a failed source chain is reused before retrying.
    ///
    /// Zero still shares a failed attempt with callers queued behind it.
    #[must_use]
    pub fn with_failure_ttl(mut self, failure_ttl: Duration) -> Self {
        self.failure_ttl = failure_ttl;
        self
    }

    /// Set the static prices served when every source fails and nothing is cached.
    #[must_use]
    pub fn with_fallbacks(mut self, fallbacks: impl IntoIterator<Item = (AssetSymbol, Decimal)>) -> Self {
        self.fallbacks = fallbacks.into_iter().collect();
        self
    }

    /// Configured TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self, asset: &AssetSymbol) -> Slot {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(asset.clone()).or_default())
    }

    /// Get a quote no older than `max_age`, refreshing through the source chain.
    ///
    /// Resolution order: fresh cached quote, then each source in turn, then
    /// the last cached quote regardless of age, then the static fallback.
    /// While a failed chain is recent, or finished while this call waited on
    /// the slot, its answer is reused instead of querying the sources again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PricingUnavailable`] only when every source failed,
    /// nothing was ever cached and no fallback price is configured.
    pub async fn get_price(&self, asset: &AssetSymbol, max_age: Duration) -> Result<PriceQuote> {
        let slot = self.slot(asset);
        let seen_failures = slot.failed_attempts.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;
        let now = self.clock.now();

        if let Some(quote) = state.quote.as_ref() {
            if quote.is_fresh(now, max_age) {
                self.stats.lock().hits += 1;
                debug!("Price for {} served from cache ({})", asset, quote.source);
                return Ok(quote.clone());
            }
        }

        self.stats.lock().misses += 1;

        if let Some(failure) = state.failure.as_ref() {
            let queued_behind = slot.failed_attempts.load(Ordering::Acquire) != seen_failures;
            if queued_behind || self.failure_is_recent(failure, now) {
                debug!("Reusing failed price lookup for {} from {}", asset, failure.finished_at);
                self.stats.lock().failures_reused += 1;
                return self.degraded_answer(asset, failure.answer, failure.quote.clone());
            }
        }

        for source in &self.sources {
            self.stats.lock().upstream_fetches += 1;
            match source.fetch(asset).await {
                Ok(quote) => {
                    info!(
                        "Fetched {} price {} USD from {}",
                        asset, quote.unit_price_usd, quote.source
                    );
                    state.quote = Some(quote.clone());
                    state.failure = None;
                    return Ok(quote);
                }
                Err(e) => {
                    self.stats.lock().upstream_failures += 1;
                    warn!("Price source failed for {}: {}", asset, e);
                }
            }
        }

        let (answer, quote) = if let Some(stale) = state.quote.as_ref() {
            warn!(
                "All price sources failed for {}, serving stale quote from {}",
                asset, stale.fetched_at
            );
            (Degraded::Stale, Some(stale.clone()))
        } else if let Some(price) = self.fallbacks.get(asset) {
            warn!(
                "All price sources failed for {}, serving static fallback {} USD",
                asset, price
            );
            let finished_at = self.clock.now();
            (
                Degraded::Fallback,
                Some(PriceQuote::fallback(asset.clone(), *price, finished_at)),
            )
        } else {
            warn!("No price available for {} from any source or fallback", asset);
            (Degraded::Unavailable, None)
        };

        state.failure = Some(FailedAttempt {
            finished_at: self.clock.now(),
            answer,
            quote: quote.clone(),
        });
        slot.failed_attempts.fetch_add(1, Ordering::Release);

        self.degraded_answer(asset, answer, quote)
    }

    fn failure_is_recent(&self, failure: &FailedAttempt, now: DateTime<Utc>) -> bool {
        // A clock that stepped backwards still counts as recent.
        match (now - failure.finished_at).to_std() {
            Ok(age) => age < self.failure_ttl,
            Err(_) => true,
        }
    }

    fn degraded_answer(
        &self,
        asset: &AssetSymbol,
        answer: Degraded,
        quote: Option<PriceQuote>,
    ) -> Result<PriceQuote> {
        match (answer, quote) {
            (Degraded::Stale, Some(quote)) => {
                self.stats.lock().stale_served += 1;
                Ok(quote)
            }
            (Degraded::Fallback, Some(quote)) => {
                self.stats.lock().fallback_served += 1;
                Ok(quote)
            }
            _ => Err(Error::PricingUnavailable {
                asset: asset.clone(),
            }),
        }
    }

    /// Get a quote using the configured TTL.
    ///
    /// # Errors
    ///
    /// See [`PriceCache::get_price`].
    pub async fn get_price_default(&self, asset: &AssetSymbol) -> Result<PriceQuote> {
        self.get_price(asset, self.ttl).await
    }

    /// Currently cached quote, if any, without touching sources or stats.
    ///
    /// Returns `None` while a refresh for the asset is in flight.
    #[must_use]
    pub fn peek(&self, asset: &AssetSymbol) -> Option<PriceQuote> {
        let slot = self.slots.lock().get(asset).cloned()?;
        let state = slot.state.try_lock().ok()?;
        state.quote.clone()
    }

    /// Drop the cached quote and any remembered failure for `asset` so the
    /// next call goes upstream.
    pub async fn invalidate(&self, asset: &AssetSymbol) {
        let slot = self.slots.lock().get(asset).cloned();
        if let Some(slot) = slot {
            *slot.state.lock().await = SlotState::default();
        }
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }
}
