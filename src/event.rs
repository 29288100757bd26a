//! Engine event system.

use crate::types::{AssetSymbol, IdentityKey, PackageId};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// An identity hit its request cap.
    Throttled {
        /// Throttled identity.
        identity: IdentityKey,
        /// When its window closes.
        reset_at: DateTime<Utc>,
    },

    /// An exempt identity received a package without paying.
    PaymentWaived {
        /// Exempt identity.
        identity: IdentityKey,
        /// Package granted.
        package: PackageId,
    },

    /// A charge was priced from a static fallback quote.
    FallbackQuoteUsed {
        /// Asset with no live or cached price.
        asset: AssetSymbol,
    },

    /// Expired rate limit records were deleted.
    RecordsSwept {
        /// Number of records removed.
        removed: usize,
    },

    /// The maintenance task stopped.
    MaintenanceStopped,
}

/// Channel for receiving engine events.
pub type EngineEventsChannel = broadcast::Receiver<EngineEvent>;

/// Sender for engine events.
pub type EngineEventsSender = broadcast::Sender<EngineEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (EngineEventsSender, EngineEventsChannel) {
    broadcast::channel(256)
}
