//! Persistence for rate limit records.

use crate::types::IdentityKey;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Request count of one identity within one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// Counted identity.
    pub identity: IdentityKey,
    /// Start of the window the count belongs to.
    pub window_start: DateTime<Utc>,
    /// Admissions granted in that window.
    pub count: u32,
}

/// Outcome of an atomic check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDecision {
    /// The request was counted; `count` is the new total for the window.
    Admitted {
        /// Count after incrementing.
        count: u32,
    },
    /// The window is full; nothing was changed.
    Denied {
        /// Count at the time of the check.
        count: u32,
    },
}

/// Key-value store for rate limit records.
///
/// A single-process deployment can use [`InMemoryStore`]. A multi-process
/// deployment needs an implementation over a shared store so that every
/// instance sees the same count for an identity.
pub trait RateLimitStore: Send + Sync + Debug {
    /// Atomically count one request for `identity` in the window starting at
    /// `window_start`, unless `max_requests` are already counted.
    ///
    /// A stored record from any other window is treated as a count of zero
    /// and overwritten. Implementations must serialize concurrent calls for
    /// the same identity so the cap is never exceeded.
    fn admit_in_window(
        &self,
        identity: &IdentityKey,
        window_start: DateTime<Utc>,
        max_requests: u32,
    ) -> StoreDecision;

    /// Current record for `identity`, if any.
    fn get(&self, identity: &IdentityKey) -> Option<RateLimitRecord>;

    /// Delete records whose window started before `cutoff`.
    /// Returns the number of records removed.
    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize;

    /// Number of stored records.
    fn len(&self) -> usize;

    /// Check if the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store backed by a sharded concurrent map.
///
/// The map's per-entry write lock makes each check-and-increment a single
/// read-modify-write; different identities usually land on different shards
/// and do not contend.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: DashMap<IdentityKey, RateLimitRecord>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for InMemoryStore {
    fn admit_in_window(
        &self,
        identity: &IdentityKey,
        window_start: DateTime<Utc>,
        max_requests: u32,
    ) -> StoreDecision {
        let mut record = self
            .records
            .entry(identity.clone())
            .or_insert_with(|| RateLimitRecord {
                identity: identity.clone(),
                window_start,
                count: 0,
            });

        if record.window_start != window_start {
            record.window_start = window_start;
            record.count = 0;
        }

        if record.count >= max_requests {
            StoreDecision::Denied {
                count: record.count,
            }
        } else {
            record.count += 1;
            StoreDecision::Admitted {
                count: record.count,
            }
        }
    }

    fn get(&self, identity: &IdentityKey) -> Option<RateLimitRecord> {
        self.records.get(identity).map(|r| r.value().clone())
    }

    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.window_start >= cutoff);
        before.saturating_sub(self.records.len())
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
