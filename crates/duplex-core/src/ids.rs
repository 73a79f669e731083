//! Numeric ID newtypes.
//!
//! Connections and correlated requests are both keyed by plain integers on the
//! wire, but they must never be mixed up in code. Each kind gets its own
//! newtype wrapper around `u64`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mask keeping ids inside the non-negative `i64` range (63 bits).
const ID_MASK: u64 = i64::MAX as u64;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap an existing raw value.
            #[must_use]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Return the raw integer value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

numeric_id! {
    /// Process-unique identifier of a live connection.
    ConnectionId
}

numeric_id! {
    /// Identifier tagging one outstanding synchronous request.
    CorrelationId
}

impl ConnectionId {
    /// Generate a new random 63-bit connection id.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random::<u64>() & ID_MASK)
    }
}

impl CorrelationId {
    /// Random starting point for a correlation counter.
    ///
    /// Kept below 2^32 so ids stay exactly representable for peers that parse
    /// JSON numbers as doubles.
    #[must_use]
    pub fn random_offset() -> Self {
        Self(u64::from(rand::random::<u32>()))
    }

    /// The id following this one, wrapping inside the 63-bit range.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1) & ID_MASK)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_connection_ids_fit_in_63_bits() {
        for _ in 0..1000 {
            let id = ConnectionId::random();
            assert!(i64::try_from(id.get()).is_ok());
        }
    }

    #[test]
    fn random_connection_ids_differ() {
        let a = ConnectionId::random();
        let b = ConnectionId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn correlation_offset_below_u32_max() {
        let id = CorrelationId::random_offset();
        assert!(id.get() <= u64::from(u32::MAX));
    }

    #[test]
    fn correlation_next_increments() {
        let id = CorrelationId::from_raw(41);
        assert_eq!(id.next().get(), 42);
    }

    #[test]
    fn correlation_next_wraps_inside_mask() {
        let id = CorrelationId::from_raw(ID_MASK);
        assert_eq!(id.next().get(), 0);
    }

    #[test]
    fn serializes_as_plain_number() {
        let json = serde_json::to_string(&ConnectionId::from_raw(7)).unwrap();
        assert_eq!(json, "7");
        let back: CorrelationId = serde_json::from_str("12").unwrap();
        assert_eq!(back, CorrelationId::from(12));
    }

    #[test]
    fn display_shows_raw_value() {
        assert_eq!(ConnectionId::from_raw(99).to_string(), "99");
    }
}
