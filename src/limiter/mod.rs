//! Per-identity request throttling.
//!
//! Each identity gets `max_requests` admissions per fixed window. Windows are
//! aligned to the Unix epoch (`floor(now / window) * window`), so every
//! instance sharing a store agrees on window boundaries without coordination.
//!
//! ```text
//! admit(identity)
//!        │
//!        ▼
//! ┌─────────────────┐  yes
//! │ exempt?         ├──────► Admitted { remaining: max } (not counted)
//! └───────┬─────────┘
//!         │ no
//!         ▼
//! ┌─────────────────┐
//! │ store: check +  │  count < max ──► Admitted { remaining }
//! │ increment       │
//! └───────┬─────────┘
//!         │ count >= max
//!         ▼
//!   Denied { reset_at }
//! ```

mod store;

pub use store::{InMemoryStore, RateLimitRecord, RateLimitStore, StoreDecision};

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use crate::types::IdentityKey;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An identity that bypasses throttling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExemptionEntry {
    /// Exempt identity.
    pub identity: IdentityKey,
    /// Why it is exempt, for audit logs.
    pub reason: String,
    /// Whether the identity also skips payment for credit packages.
    #[serde(default)]
    pub waive_payment: bool,
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Admission {
    /// The request may proceed.
    Admitted {
        /// Admissions left in the current window.
        remaining: u32,
        /// When the current window closes.
        reset_at: DateTime<Utc>,
    },
    /// The identity's quota for this window is used up.
    Denied {
        /// When the current window closes.
        reset_at: DateTime<Utc>,
    },
}

impl Admission {
    /// Returns true if the request may proceed.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    /// When the current window closes.
    #[must_use]
    pub fn reset_at(&self) -> DateTime<Utc> {
        match self {
            Self::Admitted { reset_at, .. } | Self::Denied { reset_at } => *reset_at,
        }
    }

    /// Convert a denial into [`Error::RateLimitExceeded`].
    ///
    /// # Errors
    ///
    /// Returns the error when the admission was denied.
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Denied { reset_at } => Err(Error::RateLimitExceeded { reset_at }),
            admitted @ Self::Admitted { .. } => Ok(admitted),
        }
    }
}

/// Fixed-window rate limiter with an exemption list.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    retain_windows: u32,
    exemptions: HashMap<IdentityKey, ExemptionEntry>,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if [`RateLimitConfig::validate`] rejects
    /// `config` or an identity is listed as exempt twice.
    pub fn new(
        config: &RateLimitConfig,
        exemptions: Vec<ExemptionEntry>,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let mut table = HashMap::with_capacity(exemptions.len());
        for entry in exemptions {
            info!("Rate limit exemption for {} ({})", entry.identity, entry.reason);
            if let Some(previous) = table.insert(entry.identity.clone(), entry) {
                return Err(Error::Config(format!(
                    "identity {} is exempt more than once",
                    previous.identity
                )));
            }
        }

        Ok(Self {
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            retain_windows: config.retain_windows.max(1),
            exemptions: table,
            store,
            clock,
        })
    }

    /// Admissions allowed per window.
    #[must_use]
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Exemption entry for `identity`, if it has one.
    #[must_use]
    pub fn exemption(&self, identity: &IdentityKey) -> Option<&ExemptionEntry> {
        self.exemptions.get(identity)
    }

    /// Returns true if `identity` bypasses throttling.
    #[must_use]
    pub fn is_exempt(&self, identity: &IdentityKey) -> bool {
        self.exemptions.contains_key(identity)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn window_secs(&self) -> i64 {
        self.window.as_secs() as i64
    }

    /// Start and end of the window containing `now`.
    ///
    /// The window is bounded at construction, so clamping only happens for a
    /// clock at the edge of the representable range.
    fn window_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let size = self.window_secs();
        let start_secs = now.timestamp().div_euclid(size) * size;
        let start = DateTime::from_timestamp(start_secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = start_secs
            .checked_add(size)
            .and_then(|end| DateTime::from_timestamp(end, 0))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (start, end)
    }

    /// Count a request for `identity` and decide whether it may proceed.
    ///
    /// Exempt identities are always admitted and never counted.
    pub fn admit(&self, identity: &IdentityKey) -> Admission {
        let (window_start, reset_at) = self.window_bounds(self.clock.now());

        if self.is_exempt(identity) {
            debug!("Identity {} is exempt from rate limiting", identity);
            return Admission::Admitted {
                remaining: self.max_requests,
                reset_at,
            };
        }

        match self
            .store
            .admit_in_window(identity, window_start, self.max_requests)
        {
            StoreDecision::Admitted { count } => Admission::Admitted {
                remaining: self.max_requests.saturating_sub(count),
                reset_at,
            },
            StoreDecision::Denied { count } => {
                debug!(
                    "Identity {} denied ({} of {} used, resets at {})",
                    identity, count, self.max_requests, reset_at
                );
                Admission::Denied { reset_at }
            }
        }
    }

    /// What [`RateLimiter::admit`] would answer, without counting anything.
    #[must_use]
    pub fn status(&self, identity: &IdentityKey) -> Admission {
        let (window_start, reset_at) = self.window_bounds(self.clock.now());

        if self.is_exempt(identity) {
            return Admission::Admitted {
                remaining: self.max_requests,
                reset_at,
            };
        }

        let used = self
            .store
            .get(identity)
            .filter(|record| record.window_start == window_start)
            .map_or(0, |record| record.count);

        if used >= self.max_requests {
            Admission::Denied { reset_at }
        } else {
            Admission::Admitted {
                remaining: self.max_requests - used,
                reset_at,
            }
        }
    }

    /// Delete records not touched within the last `retain_windows` windows.
    ///
    /// Returns the number of records removed.
    pub fn sweep(&self) -> usize {
        let (window_start, _) = self.window_bounds(self.clock.now());
        let cutoff = i64::from(self.retain_windows - 1)
            .checked_mul(self.window_secs())
            .and_then(TimeDelta::try_seconds)
            .and_then(|keep| window_start.checked_sub_signed(keep));
        let Some(cutoff) = cutoff else {
            warn!("Rate limit retention reaches past the earliest timestamp, nothing swept");
            return 0;
        };

        let removed = self.store.purge_older_than(cutoff);
        if removed > 0 {
            debug!("Swept {} expired rate limit records", removed);
        }
        removed
    }

    /// Number of identities currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.store.len()
    }
}
