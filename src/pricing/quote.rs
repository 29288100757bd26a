//! Price quotes produced by sources and served by the cache.

use crate::types::{AssetSymbol, SourceTag};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// USD price of one unit of an asset at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Priced asset.
    pub asset: AssetSymbol,
    /// USD value of one whole unit.
    pub unit_price_usd: Decimal,
    /// When the quote was obtained.
    pub fetched_at: DateTime<Utc>,
    /// Which source produced it.
    pub source: SourceTag,
}

impl PriceQuote {
    /// Create a quote.
    #[must_use]
    pub fn new(
        asset: AssetSymbol,
        unit_price_usd: Decimal,
        fetched_at: DateTime<Utc>,
        source: SourceTag,
    ) -> Self {
        Self {
            asset,
            unit_price_usd,
            fetched_at,
            source,
        }
    }

    /// Quote built from the static fallback table.
    #[must_use]
    pub fn fallback(asset: AssetSymbol, unit_price_usd: Decimal, at: DateTime<Utc>) -> Self {
        Self::new(asset, unit_price_usd, at, SourceTag::new(SourceTag::FALLBACK))
    }

    /// 1:1 quote for a USD-pegged currency; no oracle involved.
    #[must_use]
    pub fn nominal(asset: AssetSymbol, at: DateTime<Utc>) -> Self {
        Self::new(asset, Decimal::ONE, at, SourceTag::new(SourceTag::NOMINAL))
    }

    /// Whether the quote is no older than `max_age` at `now`.
    ///
    /// A quote stamped in the future (clock skew between hosts) counts as fresh.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        (now - self.fetched_at)
            .to_std()
            .map_or(true, |age| age <= max_age)
    }
}
