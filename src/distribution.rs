//! Payment distribution across recipients.
//!
//! A payment is split by a fixed, ordered share table. Every share except the
//! last is `floor(total * percentage / 100)` at the currency's unit
//! granularity; the last share takes whatever remains. This makes the sum of
//! shares equal the total exactly, and makes table order part of the
//! contract: the last recipient absorbs rounding dust.

use crate::error::{Error, Result};
use crate::types::RecipientId;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One row of a share table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareEntry {
    /// Destination of this share.
    pub recipient: RecipientId,
    /// Percentage of the total, `0..=100`.
    pub percentage: Decimal,
}

impl ShareEntry {
    /// Create a share entry.
    #[must_use]
    pub fn new(recipient: impl Into<RecipientId>, percentage: Decimal) -> Self {
        Self {
            recipient: recipient.into(),
            percentage,
        }
    }
}

/// A validated, ordered share table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareTable {
    entries: Vec<ShareEntry>,
}

impl ShareTable {
    /// Validate and wrap a share table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidShareTable`] if the table is empty, a
    /// percentage is negative, a recipient repeats, or the percentages do not
    /// sum to exactly 100.
    pub fn new(entries: Vec<ShareEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::InvalidShareTable("share table is empty".to_string()));
        }

        let mut recipients = HashSet::new();
        for entry in &entries {
            if entry.percentage.is_sign_negative() {
                return Err(Error::InvalidShareTable(format!(
                    "negative percentage {} for {}",
                    entry.percentage, entry.recipient
                )));
            }
            if !recipients.insert(&entry.recipient) {
                return Err(Error::InvalidShareTable(format!(
                    "recipient {} listed twice",
                    entry.recipient
                )));
            }
        }

        let sum: Decimal = entries.iter().map(|e| e.percentage).sum();
        if sum != Decimal::ONE_HUNDRED {
            return Err(Error::InvalidShareTable(format!(
                "percentages sum to {sum}, expected 100"
            )));
        }

        Ok(Self { entries })
    }

    /// Rows in table order.
    #[must_use]
    pub fn entries(&self) -> &[ShareEntry] {
        &self.entries
    }

    /// Split `total` at a granularity of `decimals` fractional digits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAmount`] if `total` is negative, is finer than
    /// the unit granularity, or overflows during multiplication.
    pub fn split(&self, total: Decimal, decimals: u32) -> Result<DistributionPlan> {
        let invalid = |reason: &str| Error::InvalidAmount {
            amount: total,
            reason: reason.to_string(),
        };

        if total.is_sign_negative() && !total.is_zero() {
            return Err(invalid("total must not be negative"));
        }
        if total.round_dp_with_strategy(decimals, RoundingStrategy::ToZero) != total {
            return Err(invalid("total is finer than the smallest unit"));
        }

        let (last, head) = self
            .entries
            .split_last()
            .ok_or_else(|| Error::InvalidShareTable("share table is empty".to_string()))?;

        let mut shares = Vec::with_capacity(self.entries.len());
        let mut allocated = Decimal::ZERO;

        for entry in head {
            let amount = total
                .checked_mul(entry.percentage)
                .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
                .ok_or_else(|| invalid("overflow computing share"))?
                .round_dp_with_strategy(decimals, RoundingStrategy::ToZero);
            allocated += amount;
            shares.push(Share {
                recipient: entry.recipient.clone(),
                percentage: entry.percentage,
                amount,
            });
        }

        shares.push(Share {
            recipient: last.recipient.clone(),
            percentage: last.percentage,
            amount: total - allocated,
        });

        Ok(DistributionPlan {
            total_amount: total,
            shares,
        })
    }
}

/// Validate `share_table` and split `total` in one step.
///
/// Prefer building a [`ShareTable`] once at startup; this is for callers
/// holding an ad hoc table.
///
/// # Errors
///
/// Returns [`Error::InvalidShareTable`] or [`Error::InvalidAmount`].
pub fn split(total: Decimal, share_table: Vec<ShareEntry>, decimals: u32) -> Result<DistributionPlan> {
    ShareTable::new(share_table)?.split(total, decimals)
}

/// One recipient's portion of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Destination.
    pub recipient: RecipientId,
    /// Configured percentage.
    pub percentage: Decimal,
    /// Amount in the payment currency.
    pub amount: Decimal,
}

/// Exact split of a payment across recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionPlan {
    /// Amount being split.
    pub total_amount: Decimal,
    /// Shares in table order.
    pub shares: Vec<Share>,
}

impl DistributionPlan {
    /// Sum of all share amounts; always equals `total_amount`.
    #[must_use]
    pub fn allocated(&self) -> Decimal {
        self.shares.iter().map(|s| s.amount).sum()
    }

    /// Amount for a recipient, if present.
    #[must_use]
    pub fn amount_for(&self, recipient: &RecipientId) -> Option<Decimal> {
        self.shares
            .iter()
            .find(|s| s.recipient == *recipient)
            .map(|s| s.amount)
    }
}
