//! Credit package catalog.
//!
//! Packages are loaded from configuration and read on every quote. The table
//! is published as an immutable snapshot; administrative changes build a new
//! table and swap it in whole, so readers never observe a half-applied edit.

use crate::error::{Error, Result};
use crate::types::PackageId;
use parking_lot::RwLock;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::info;

/// Which credit grant a payment currency earns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditRail {
    /// Standard grant.
    #[default]
    Primary,
    /// Incentivized grant, never smaller than the primary one.
    Bonus,
}

/// A purchasable bundle of credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPackage {
    /// Package identifier.
    pub id: PackageId,

    /// Price in USD.
    pub usd_price: Decimal,

    /// Credits granted when paying on the primary rail.
    pub primary_currency_credits: u64,

    /// Credits granted when paying on the bonus rail.
    pub bonus_currency_credits: u64,

    /// Whether the package can currently be bought.
    #[serde(default = "default_active")]
    pub active: bool,

    /// Feature tiers the package unlocks.
    #[serde(default)]
    pub min_tier_flags: BTreeSet<String>,
}

const fn default_active() -> bool {
    true
}

impl CreditPackage {
    /// Credits granted for a purchase on `rail`.
    #[must_use]
    pub fn credits_for(&self, rail: CreditRail) -> u64 {
        match rail {
            CreditRail::Primary => self.primary_currency_credits,
            CreditRail::Bonus => self.bonus_currency_credits,
        }
    }

    /// Extra credits earned on the bonus rail, as a percentage of the primary grant.
    ///
    /// This is whatever the configuration says; no curve is assumed between tiers.
    #[must_use]
    pub fn bonus_percent(&self) -> Decimal {
        if self.primary_currency_credits == 0 {
            return Decimal::ZERO;
        }
        let primary = Decimal::from(self.primary_currency_credits);
        let bonus = Decimal::from(self.bonus_currency_credits);
        ((bonus - primary) * Decimal::ONE_HUNDRED / primary)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Check the package invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPackage`] if the id is empty, the price is not
    /// positive, or the bonus grant is smaller than the primary one.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidPackage {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.as_str().is_empty() {
            return Err(invalid("empty package id"));
        }
        if self.usd_price <= Decimal::ZERO {
            return Err(invalid("usd_price must be positive"));
        }
        if self.bonus_currency_credits < self.primary_currency_credits {
            return Err(invalid(
                "bonus_currency_credits must be at least primary_currency_credits",
            ));
        }
        Ok(())
    }
}

/// Table of credit packages.
#[derive(Debug, Default)]
pub struct CreditCatalog {
    table: RwLock<Arc<Vec<CreditPackage>>>,
}

impl CreditCatalog {
    /// Build a catalog, validating every package.
    ///
    /// # Errors
    ///
    /// Returns an error if any package is invalid or ids repeat.
    pub fn new(packages: Vec<CreditPackage>) -> Result<Self> {
        validate_table(&packages)?;
        Ok(Self {
            table: RwLock::new(Arc::new(packages)),
        })
    }

    fn snapshot(&self) -> Arc<Vec<CreditPackage>> {
        Arc::clone(&self.table.read())
    }

    /// Look up an active package.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PackageNotFound`] if the id is unknown or inactive.
    pub fn get(&self, id: &PackageId) -> Result<CreditPackage> {
        self.snapshot()
            .iter()
            .find(|p| p.id == *id && p.active)
            .cloned()
            .ok_or_else(|| Error::PackageNotFound(id.clone()))
    }

    /// Look up a package whether or not it is active (admin view).
    ///
    /// # Errors
    ///
    /// Returns [`Error::PackageNotFound`] if the id is unknown.
    pub fn get_any(&self, id: &PackageId) -> Result<CreditPackage> {
        self.snapshot()
            .iter()
            .find(|p| p.id == *id)
            .cloned()
            .ok_or_else(|| Error::PackageNotFound(id.clone()))
    }

    /// Active packages in configuration order.
    #[must_use]
    pub fn list(&self) -> Vec<CreditPackage> {
        self.snapshot().iter().filter(|p| p.active).cloned().collect()
    }

    /// All packages including inactive ones (admin view).
    #[must_use]
    pub fn list_all(&self) -> Vec<CreditPackage> {
        Vec::clone(&self.snapshot())
    }

    /// Credits an active package grants on `rail`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PackageNotFound`] if the id is unknown or inactive.
    pub fn credits_for(&self, id: &PackageId, rail: CreditRail) -> Result<u64> {
        self.get(id).map(|p| p.credits_for(rail))
    }

    /// Activate or deactivate a package.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PackageNotFound`] if the id is unknown.
    pub fn set_active(&self, id: &PackageId, active: bool) -> Result<()> {
        let mut table = self.table.write();
        let mut next = Vec::clone(&table);
        let package = next
            .iter_mut()
            .find(|p| p.id == *id)
            .ok_or_else(|| Error::PackageNotFound(id.clone()))?;
        package.active = active;
        *table = Arc::new(next);

        info!("Package {} set active={}", id, active);
        Ok(())
    }

    /// Replace the whole table.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the current table in place, if the new
    /// table is invalid.
    pub fn replace(&self, packages: Vec<CreditPackage>) -> Result<()> {
        validate_table(&packages)?;
        let count = packages.len();
        *self.table.write() = Arc::new(packages);

        info!("Credit catalog replaced ({} packages)", count);
        Ok(())
    }

    /// Number of packages, active or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Check if the catalog has no packages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

fn validate_table(packages: &[CreditPackage]) -> Result<()> {
    let mut seen = HashSet::new();
    for package in packages {
        package.validate()?;
        if !seen.insert(&package.id) {
            return Err(Error::InvalidPackage {
                id: package.id.clone(),
                reason: "duplicate package id".to_string(),
            });
        }
    }
    Ok(())
}
