//! USD → payment currency conversion for credit packages.
//!
//! Every price shown to a buyer goes through [`PricingEngine::required_native_amount`];
//! nothing else converts between USD and a payment currency.

use crate::catalog::{CreditCatalog, CreditRail};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::pricing::cache::PriceCache;
use crate::pricing::quote::PriceQuote;
use crate::types::{AssetSymbol, CurrencyId, PackageId};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Finest unit granularity accepted for a payment currency (wei-style).
pub const MAX_CURRENCY_DECIMALS: u32 = 18;

/// Scale at which the raw quotient is first rounded half away from zero,
/// before the ceiling to unit granularity.
const QUOTIENT_SCALE: u32 = 24;

/// How a payment currency relates to USD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyKind {
    /// USD-pegged; converted 1:1 without an oracle.
    Fixed,
    /// Floating; converted through the price cache.
    Volatile,
}

/// An accepted payment rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCurrency {
    /// Currency identifier used in requests.
    pub id: CurrencyId,
    /// Asset priced by the oracle for volatile currencies.
    pub asset: AssetSymbol,
    /// Fixed or volatile.
    pub kind: CurrencyKind,
    /// Fractional digits of the smallest unit.
    pub decimals: u32,
    /// Which credit grant purchases in this currency earn.
    #[serde(default)]
    pub credit_rail: CreditRail,
}

impl PaymentCurrency {
    /// Smallest representable amount.
    #[must_use]
    pub fn unit(&self) -> Decimal {
        Decimal::new(1, self.decimals)
    }
}

/// Amount to charge for one package in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Package being bought.
    pub package: PackageId,
    /// Currency the amount is denominated in.
    pub currency: CurrencyId,
    /// Amount to charge, rounded up to the currency's smallest unit.
    pub required_native_amount: Decimal,
    /// Credits the purchase grants on this currency's rail.
    pub credits_granted: u64,
    /// Quote the amount was derived from.
    pub quote_used: PriceQuote,
    /// When the conversion was computed.
    pub computed_at: DateTime<Utc>,
}

/// Converts package prices into payment currency amounts.
#[derive(Debug)]
pub struct PricingEngine {
    catalog: Arc<CreditCatalog>,
    currencies: HashMap<CurrencyId, PaymentCurrency>,
    cache: Arc<PriceCache>,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl PricingEngine {
    /// Create a pricing engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if currency ids repeat or a currency is finer
    /// than [`MAX_CURRENCY_DECIMALS`].
    pub fn new(
        catalog: Arc<CreditCatalog>,
        currencies: Vec<PaymentCurrency>,
        cache: Arc<PriceCache>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut table = HashMap::with_capacity(currencies.len());
        for currency in currencies {
            if currency.decimals > MAX_CURRENCY_DECIMALS {
                return Err(Error::Config(format!(
                    "currency {} has {} decimals, maximum is {MAX_CURRENCY_DECIMALS}",
                    currency.id, currency.decimals
                )));
            }
            if let Some(previous) = table.insert(currency.id.clone(), currency) {
                return Err(Error::Config(format!("currency {} defined twice", previous.id)));
            }
        }

        let max_age = cache.ttl();
        Ok(Self {
            catalog,
            currencies: table,
            cache,
            max_age,
            clock,
        })
    }

    /// Override the maximum quote age (defaults to the cache TTL).
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Look up a configured currency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCurrency`] if it is not configured.
    pub fn currency(&self, id: &CurrencyId) -> Result<&PaymentCurrency> {
        self.currencies
            .get(id)
            .ok_or_else(|| Error::UnknownCurrency(id.clone()))
    }

    /// Configured currencies, in no particular order.
    pub fn currencies(&self) -> impl Iterator<Item = &PaymentCurrency> {
        self.currencies.values()
    }

    /// Amount of `currency_id` required to buy `package_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::PackageNotFound`] for unknown or inactive packages
    /// - [`Error::UnknownCurrency`] for unconfigured currencies
    /// - [`Error::PricingUnavailable`] if no quote exists at all
    pub async fn required_native_amount(
        &self,
        package_id: &PackageId,
        currency_id: &CurrencyId,
    ) -> Result<ConversionResult> {
        let package = self.catalog.get(package_id)?;
        let currency = self.currency(currency_id)?;

        let quote = match currency.kind {
            CurrencyKind::Fixed => PriceQuote::nominal(currency.asset.clone(), self.clock.now()),
            CurrencyKind::Volatile => self.cache.get_price(&currency.asset, self.max_age).await?,
        };

        let amount = convert_usd(package.usd_price, &quote, currency.decimals)?;

        debug!(
            "Package {} costs {} {} at {} USD/{} ({})",
            package.id, amount, currency.id, quote.unit_price_usd, quote.asset, quote.source
        );

        Ok(ConversionResult {
            package: package.id.clone(),
            currency: currency.id.clone(),
            required_native_amount: amount,
            credits_granted: package.credits_for(currency.credit_rail),
            quote_used: quote,
            computed_at: self.clock.now(),
        })
    }
}

/// Convert `usd` into units of the quoted asset, never rounding down.
///
/// The ceiling is computed exactly on the decimal mantissas whenever the
/// scaled integers fit. Larger magnitudes fall back to decimal division:
/// the quotient is rounded half away from zero at a fine internal scale,
/// then up to `decimals`, and one more unit is added if precision loss
/// still left the amount short of `usd`.
///
/// # Errors
///
/// Returns [`Error::PricingUnavailable`] for a non-positive quote and
/// [`Error::InvalidAmount`] for a negative amount or on overflow.
pub fn convert_usd(usd: Decimal, quote: &PriceQuote, decimals: u32) -> Result<Decimal> {
    if quote.unit_price_usd <= Decimal::ZERO {
        return Err(Error::PricingUnavailable {
            asset: quote.asset.clone(),
        });
    }
    if usd.is_sign_negative() && !usd.is_zero() {
        return Err(Error::InvalidAmount {
            amount: usd,
            reason: "USD amount must not be negative".to_string(),
        });
    }

    if let Some(units) = ceil_units(usd, quote.unit_price_usd, decimals) {
        if let Ok(amount) = Decimal::try_from_i128_with_scale(units, decimals) {
            return Ok(amount);
        }
    }

    let overflow = || Error::InvalidAmount {
        amount: usd,
        reason: format!("overflow converting at {} USD", quote.unit_price_usd),
    };

    let mut amount = usd
        .checked_div(quote.unit_price_usd)
        .ok_or_else(overflow)?
        .round_dp_with_strategy(QUOTIENT_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .round_dp_with_strategy(decimals, RoundingStrategy::AwayFromZero);

    let covered = amount.checked_mul(quote.unit_price_usd).ok_or_else(overflow)?;
    if covered < usd {
        amount = amount
            .checked_add(Decimal::new(1, decimals))
            .ok_or_else(overflow)?;
    }

    Ok(amount)
}

/// `ceil(usd / price)` in units of `10^-decimals`, or `None` on overflow.
fn ceil_units(usd: Decimal, price: Decimal, decimals: u32) -> Option<i128> {
    let exponent = i64::from(decimals) + i64::from(price.scale()) - i64::from(usd.scale());
    let pow = |e: i64| u32::try_from(e).ok().and_then(|e| 10i128.checked_pow(e));

    let (numerator, denominator) = if exponent >= 0 {
        (usd.mantissa().checked_mul(pow(exponent)?)?, price.mantissa())
    } else {
        (usd.mantissa(), price.mantissa().checked_mul(pow(-exponent)?)?)
    };

    let quotient = numerator / denominator;
    if numerator % denominator == 0 {
        Some(quotient)
    } else {
        quotient.checked_add(1)
    }
}
