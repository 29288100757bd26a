//! Upstream price providers.
//!
//! Each [`PriceSource`] talks to exactly one provider and makes exactly one
//! attempt per call. Retrying and falling back is the cache's job; a source
//! only turns whatever went wrong into [`SourceUnavailable`].

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::pricing::quote::PriceQuote;
use crate::types::{AssetSymbol, SourceTag};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A single upstream failed to produce a quote.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("price source {tag} unavailable: {reason}")]
pub struct SourceUnavailable {
    /// Source that failed.
    pub tag: SourceTag,
    /// Human-readable cause, for logs only.
    pub reason: String,
}

/// One upstream quote provider.
#[async_trait]
pub trait PriceSource: Send + Sync + Debug {
    /// Name used in logs and on produced quotes.
    fn tag(&self) -> &SourceTag;

    /// Fetch the current USD price of `asset`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceUnavailable`] on any network, status, decode or
    /// timeout failure. Never panics on upstream misbehaviour.
    async fn fetch(&self, asset: &AssetSymbol) -> std::result::Result<PriceQuote, SourceUnavailable>;
}

/// Configuration for an HTTP/JSON quote provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Name of the provider, e.g. `coingecko`.
    pub tag: String,

    /// Request URL; `{asset}` is replaced with the provider's asset id.
    pub url_template: String,

    /// JSON pointer to the price inside the response body, e.g. `/ethereum/usd`.
    /// `{asset}` is substituted here as well.
    pub price_pointer: String,

    /// Provider-specific ids keyed by asset symbol (`ETH = "ethereum"`).
    /// Assets missing from the map use their lower-cased symbol.
    #[serde(default)]
    pub asset_ids: BTreeMap<String, String>,
}

/// Price source that issues one HTTP GET per fetch.
#[derive(Debug)]
pub struct HttpPriceSource {
    tag: SourceTag,
    config: HttpSourceConfig,
    client: reqwest::Client,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl HttpPriceSource {
    /// Create a source from its configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: HttpSourceConfig, timeout: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("creditgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client for {}: {e}", config.tag)))?;

        Ok(Self {
            tag: SourceTag::new(&config.tag),
            config,
            client,
            timeout,
            clock,
        })
    }

    fn upstream_id(&self, asset: &AssetSymbol) -> String {
        self.config
            .asset_ids
            .iter()
            .find(|(symbol, _)| AssetSymbol::new(symbol.as_str()) == *asset)
            .map_or_else(|| asset.as_str().to_ascii_lowercase(), |(_, id)| id.clone())
    }

    fn unavailable(&self, reason: impl Into<String>) -> SourceUnavailable {
        SourceUnavailable {
            tag: self.tag.clone(),
            reason: reason.into(),
        }
    }

    async fn request(&self, url: &str) -> std::result::Result<serde_json::Value, SourceUnavailable> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| self.unavailable(format!("bad status: {e}")))?;

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| self.unavailable(format!("invalid JSON body: {e}")))
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    fn tag(&self) -> &SourceTag {
        &self.tag
    }

    async fn fetch(&self, asset: &AssetSymbol) -> std::result::Result<PriceQuote, SourceUnavailable> {
        let upstream_id = self.upstream_id(asset);
        let url = self.config.url_template.replace("{asset}", &upstream_id);
        let pointer = self.config.price_pointer.replace("{asset}", &upstream_id);

        debug!("Fetching {} price from {} ({})", asset, self.tag, url);

        let body = match tokio::time::timeout(self.timeout, self.request(&url)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!("{e}");
                return Err(e);
            }
            Err(_) => {
                warn!("Price source {} timed out after {:?}", self.tag, self.timeout);
                return Err(self.unavailable(format!("timed out after {:?}", self.timeout)));
            }
        };

        let price = extract_price(&body, &pointer)
            .ok_or_else(|| self.unavailable(format!("no positive price at {pointer}")))?;

        Ok(PriceQuote::new(asset.clone(), price, self.clock.now(), self.tag.clone()))
    }
}

/// Read a positive decimal price at `pointer`, accepting JSON numbers or
/// numeric strings (some providers quote prices as strings).
///
/// Numbers are parsed from their source text, never through `f64`.
#[must_use]
pub fn extract_price(body: &serde_json::Value, pointer: &str) -> Option<Decimal> {
    let raw = match body.pointer(pointer)? {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        _ => return None,
    };

    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
        .filter(|price| price.is_sign_positive() && !price.is_zero())
}

/// Source answering from a fixed in-memory table.
///
/// Useful for pegged assets that never need an oracle, and as a stand-in
/// provider when wiring the engine without network access.
#[derive(Debug)]
pub struct StaticPriceSource {
    tag: SourceTag,
    prices: HashMap<AssetSymbol, Decimal>,
    clock: Arc<dyn Clock>,
}

impl StaticPriceSource {
    /// Create a static source.
    #[must_use]
    pub fn new(
        tag: impl Into<SourceTag>,
        prices: impl IntoIterator<Item = (AssetSymbol, Decimal)>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tag: tag.into(),
            prices: prices.into_iter().collect(),
            clock,
        }
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    fn tag(&self) -> &SourceTag {
        &self.tag
    }

    async fn fetch(&self, asset: &AssetSymbol) -> std::result::Result<PriceQuote, SourceUnavailable> {
        self.prices
            .get(asset)
            .map(|price| PriceQuote::new(asset.clone(), *price, self.clock.now(), self.tag.clone()))
            .ok_or_else(|| SourceUnavailable {
                tag: self.tag.clone(),
                reason: format!("no static price for {asset}"),
            })
    }
}
