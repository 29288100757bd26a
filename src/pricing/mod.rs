//! USD pricing for credit packages.
//!
//! Converting a package price into a payment currency amount:
//! 1. Fixed (USD-pegged) currencies convert 1:1 without touching an oracle
//! 2. Volatile currencies go through the quote cache and its fallback chain
//!
//! # Architecture
//!
//! ```text
//! required_native_amount(package, currency)
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Check quote cache   │
//! └─────────┬───────────┘
//!           │
//!    ┌──────┴──────┐
//!    │             │
//!  FRESH         STALE / EMPTY
//!    │             │
//!    ▼             ▼
//!  Convert     Try sources in order
//!                  │
//!           ┌──────┴──────┐
//!           │             │
//!        SUCCESS      ALL FAILED
//!           │             │
//!           ▼             ▼
//!    Cache + convert   Stale quote, else static fallback,
//!                      else PricingUnavailable
//! ```

mod cache;
mod engine;
mod quote;
mod source;

pub use cache::{CacheStats, PriceCache, DEFAULT_FAILURE_TTL, DEFAULT_TTL};
pub use engine::{
    convert_usd, ConversionResult, CurrencyKind, PaymentCurrency, PricingEngine,
    MAX_CURRENCY_DECIMALS,
};
pub use quote::PriceQuote;
pub use source::{
    extract_price, HttpPriceSource, HttpSourceConfig, PriceSource, SourceUnavailable,
    StaticPriceSource,
};
