//! Identifier newtypes shared across the engine.
//!
//! Assets are upper-cased and identities lower-cased on construction so that
//! configuration and request input compare equal regardless of how a wallet
//! address or ticker was typed.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $normalize:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier, normalizing the input.
            #[must_use]
            pub fn new(value: impl AsRef<str>) -> Self {
                let normalize: fn(&str) -> String = $normalize;
                Self(normalize(value.as_ref()))
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Ticker of a priced asset, e.g. `ETH`.
    AssetSymbol,
    |s| s.trim().to_ascii_uppercase()
);

string_id!(
    /// Requesting identity, typically a wallet address.
    IdentityKey,
    |s| s.trim().to_ascii_lowercase()
);

string_id!(
    /// Credit package identifier.
    PackageId,
    |s| s.trim().to_string()
);

string_id!(
    /// Payment currency identifier, e.g. `usdc` or `eth`.
    CurrencyId,
    |s| s.trim().to_ascii_lowercase()
);

string_id!(
    /// Destination of a distribution share.
    RecipientId,
    |s| s.trim().to_string()
);

string_id!(
    /// Name of the component that produced a price quote.
    SourceTag,
    |s| s.trim().to_string()
);

impl SourceTag {
    /// Tag carried by quotes served from the static fallback table.
    pub const FALLBACK: &'static str = "fallback";

    /// Tag carried by the 1:1 quote used for USD-pegged currencies.
    pub const NOMINAL: &'static str = "nominal";

    /// Returns true if this quote came from the static fallback table.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.0 == Self::FALLBACK
    }
}
