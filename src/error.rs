//! Error types for creditgate.

use crate::types::{AssetSymbol, CurrencyId, PackageId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias using the creditgate error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the pricing, credit and throttling engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while reading or writing configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A distribution share table is malformed.
    #[error("invalid share table: {0}")]
    InvalidShareTable(String),

    /// A credit package definition violates a catalog invariant.
    #[error("invalid credit package {id}: {reason}")]
    InvalidPackage {
        /// Offending package.
        id: PackageId,
        /// What was wrong with it.
        reason: String,
    },

    /// The requested package does not exist or is not purchasable.
    #[error("package not found: {0}")]
    PackageNotFound(PackageId),

    /// The requested payment currency is not configured.
    #[error("unknown payment currency: {0}")]
    UnknownCurrency(CurrencyId),

    /// No price could be produced for the asset, not even a static fallback.
    #[error("pricing unavailable for {asset}")]
    PricingUnavailable {
        /// Asset that could not be priced.
        asset: AssetSymbol,
    },

    /// The identity has used up its quota for the current window.
    #[error("rate limit exceeded, resets at {reset_at}")]
    RateLimitExceeded {
        /// When the current window closes.
        reset_at: DateTime<Utc>,
    },

    /// An amount is negative, overflows, or is finer than the unit granularity.
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount {
        /// The rejected amount.
        amount: Decimal,
        /// Why it was rejected.
        reason: String,
    },
}

impl Error {
    /// Returns true for errors caused by the caller's input or quota, which
    /// the route layer renders as a 4xx-style response.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::PackageNotFound(_) | Self::UnknownCurrency(_) | Self::RateLimitExceeded { .. }
        )
    }

    /// Message safe to show to an end user.
    ///
    /// Upstream provider names and internal state never appear here; they
    /// belong in the server-side log.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimitExceeded { reset_at } => {
                format!("too many requests, try again after {}", reset_at.to_rfc3339())
            }
            Self::PackageNotFound(id) => format!("package {id} is not available"),
            Self::UnknownCurrency(id) => format!("payment currency {id} is not supported"),
            Self::PricingUnavailable { .. } => "pricing temporarily unavailable".to_string(),
            _ => "internal error".to_string(),
        }
    }
}
