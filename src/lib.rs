//! # creditgate
//!
//! Pricing, credit economics and request throttling for credit-based
//! payment flows.
//!
//! ## Overview
//!
//! - **Pricing**: converts USD package prices into payment currency amounts
//!   through a TTL quote cache over an ordered chain of price sources, never
//!   rounding a charge down
//! - **Catalog**: credit packages where the same USD price grants different
//!   credit totals depending on the payment rail
//! - **Distribution**: splits a received payment across recipients by fixed
//!   percentages, exactly to the smallest unit
//! - **Throttling**: fixed-window request caps per identity, with exemptions
//!
//! ## Example
//!
//! ```rust,ignore
//! use creditgate::{EngineBuilder, EngineConfig};
//!
//! let config = EngineConfig::from_file(&EngineConfig::default_path())?;
//! let engine = EngineBuilder::new(config).build()?;
//! let charge = engine.quote(&identity, &package, &currency).await?;
//! ```

pub mod catalog;
pub mod clock;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod event;
pub mod limiter;
pub mod pricing;
pub mod types;

pub use catalog::{CreditCatalog, CreditPackage, CreditRail};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, PriceConfig, RateLimitConfig};
pub use distribution::{split, DistributionPlan, Share, ShareEntry, ShareTable};
pub use engine::{Charge, Engine, EngineBuilder, MaintenanceHandle};
pub use error::{Error, Result};
pub use event::{EngineEvent, EngineEventsChannel};
pub use limiter::{Admission, ExemptionEntry, InMemoryStore, RateLimitStore, RateLimiter};
pub use pricing::{
    ConversionResult, CurrencyKind, PaymentCurrency, PriceCache, PriceQuote, PriceSource,
    PricingEngine,
};
pub use types::{AssetSymbol, CurrencyId, IdentityKey, PackageId, RecipientId, SourceTag};
