//! Configuration for creditgate.

use crate::catalog::{CreditCatalog, CreditPackage};
use crate::distribution::{ShareEntry, ShareTable};
use crate::limiter::ExemptionEntry;
use crate::pricing::{CurrencyKind, HttpSourceConfig, PaymentCurrency, MAX_CURRENCY_DECIMALS};
use crate::types::{AssetSymbol, CurrencyId, IdentityKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Price oracle configuration.
    #[serde(default)]
    pub price: PriceConfig,

    /// Accepted payment currencies.
    #[serde(default)]
    pub currencies: Vec<PaymentCurrency>,

    /// Credit packages in display order.
    #[serde(default)]
    pub packages: Vec<CreditPackage>,

    /// Share table for splitting payments, in order. The last row takes the
    /// rounding remainder.
    #[serde(default)]
    pub distribution: Vec<ShareEntry>,

    /// Request throttling.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Identities exempt from throttling.
    #[serde(default)]
    pub exemptions: Vec<ExemptionEntry>,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Price oracle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceConfig {
    /// How long a fetched quote is served without refetching.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Per-request timeout for upstream providers.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long a lookup where every provider failed is reused before the
    /// providers are tried again.
    #[serde(default = "default_failure_ttl_secs")]
    pub failure_ttl_secs: u64,

    /// Upstream providers, tried in order.
    #[serde(default)]
    pub sources: Vec<HttpSourceConfig>,

    /// Static USD prices served when every provider fails and nothing is cached.
    #[serde(default)]
    pub fallback: BTreeMap<AssetSymbol, Decimal>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Admissions per identity per window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Windows of records kept by the sweeper, including the current one.
    #[serde(default = "default_retain_windows")]
    pub retain_windows: u32,

    /// Seconds between sweeps of expired records.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            price: PriceConfig::default(),
            currencies: Vec::new(),
            packages: Vec::new(),
            distribution: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            exemptions: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            timeout_secs: default_timeout_secs(),
            failure_ttl_secs: default_failure_ttl_secs(),
            sources: Vec::new(),
            fallback: BTreeMap::new(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            retain_windows: default_retain_windows(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_ttl_secs() -> u64 {
    30
}

const fn default_timeout_secs() -> u64 {
    4
}

const fn default_failure_ttl_secs() -> u64 {
    5
}

/// Longest span of rate limit windows, including retained ones: 100 years.
pub const MAX_RATE_LIMIT_SPAN_SECS: u64 = 100 * 365 * 86_400;

const fn default_max_requests() -> u32 {
    50
}

const fn default_window_secs() -> u64 {
    3600 // 1 hour
}

const fn default_retain_windows() -> u32 {
    1
}

const fn default_sweep_interval() -> u64 {
    300 // 5 minutes
}

impl RateLimitConfig {
    /// Check the limits and that the retained span stays representable.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for a zero limit, window or sweep
    /// interval, or when `window_secs * retain_windows` exceeds
    /// [`MAX_RATE_LIMIT_SPAN_SECS`].
    pub fn validate(&self) -> crate::Result<()> {
        let config_err = |msg: String| Err(crate::Error::Config(msg));

        if self.max_requests == 0 {
            return config_err("rate_limit.max_requests must be positive".to_string());
        }
        if self.window_secs == 0 {
            return config_err("rate_limit.window_secs must be positive".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return config_err("rate_limit.sweep_interval_secs must be positive".to_string());
        }
        match self
            .window_secs
            .checked_mul(u64::from(self.retain_windows.max(1)))
        {
            Some(span) if span <= MAX_RATE_LIMIT_SPAN_SECS => Ok(()),
            _ => config_err(format!(
                "rate_limit.window_secs * retain_windows must not exceed {MAX_RATE_LIMIT_SPAN_SECS}"
            )),
        }
    }
}

impl EngineConfig {
    /// Platform default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "creditgate")
            .map(|dirs| dirs.config_dir().join("creditgate.toml"))
            .unwrap_or_else(|| PathBuf::from("creditgate.toml"))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check everything the engine would otherwise reject at build time.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for bad limits, currencies, sources
    /// or exemptions, [`crate::Error::InvalidPackage`] for a bad package and
    /// [`crate::Error::InvalidShareTable`] for a bad distribution table.
    pub fn validate(&self) -> crate::Result<()> {
        self.validate_with_sources(self.price.sources.len())
    }

    /// As [`EngineConfig::validate`], with `source_count` upstream providers
    /// available instead of the configured ones.
    pub(crate) fn validate_with_sources(&self, source_count: usize) -> crate::Result<()> {
        let config_err = |msg: String| Err(crate::Error::Config(msg));

        if self.price.ttl_secs == 0 {
            return config_err("price.ttl_secs must be positive".to_string());
        }
        if self.price.timeout_secs == 0 {
            return config_err("price.timeout_secs must be positive".to_string());
        }
        for source in &self.price.sources {
            if source.url_template.is_empty() {
                return config_err(format!("price source {} has no url_template", source.tag));
            }
            if !source.price_pointer.is_empty() && !source.price_pointer.starts_with('/') {
                return config_err(format!(
                    "price source {} pointer must start with '/'",
                    source.tag
                ));
            }
        }
        for (asset, price) in &self.price.fallback {
            if *price <= Decimal::ZERO {
                return config_err(format!("fallback price for {asset} must be positive"));
            }
        }

        self.rate_limit.validate()?;

        let mut currencies: HashSet<&CurrencyId> = HashSet::new();
        for currency in &self.currencies {
            if !currencies.insert(&currency.id) {
                return config_err(format!("currency {} defined twice", currency.id));
            }
            if currency.decimals > MAX_CURRENCY_DECIMALS {
                return config_err(format!(
                    "currency {} has {} decimals, maximum is {MAX_CURRENCY_DECIMALS}",
                    currency.id, currency.decimals
                ));
            }
            if currency.kind == CurrencyKind::Volatile
                && source_count == 0
                && !self.price.fallback.contains_key(&currency.asset)
            {
                return config_err(format!(
                    "volatile currency {} has no price source and no fallback for {}",
                    currency.id, currency.asset
                ));
            }
        }

        let mut exempt: HashSet<&IdentityKey> = HashSet::new();
        for entry in &self.exemptions {
            if !exempt.insert(&entry.identity) {
                return config_err(format!("identity {} is exempt more than once", entry.identity));
            }
        }

        CreditCatalog::new(self.packages.clone())?;
        ShareTable::new(self.distribution.clone())?;
        Ok(())
    }
}
