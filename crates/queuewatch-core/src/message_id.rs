//! Message identifiers with exact, arbitrary-precision ordering.
//!
//! Chat platforms hand out snowflake-style identifiers as decimal strings
//! (e.g. `message-accessories-1234567890123456789`). The numeric range in use
//! exceeds what an `f64` represents exactly, so ids are kept as normalized
//! digit strings and compared by length first, then digit by digit.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix the host platform places in front of message container ids.
pub const DEFAULT_ID_PREFIX: &str = "message-accessories-";

/// Totally ordered, unbounded message identifier.
///
/// Invariant: `digits` is non-empty, ASCII decimal, and has no leading zeros
/// unless the value is exactly `"0"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId {
    digits: String,
}

impl MessageId {
    /// Parse an external identifier, stripping `prefix` when present.
    ///
    /// Returns `None` for anything that is not a run of decimal digits after
    /// the prefix; callers skip such candidates.
    #[must_use]
    pub fn parse_external(external_id: &str, prefix: &str) -> Option<Self> {
        let raw = external_id.trim();
        let raw = if prefix.is_empty() {
            raw
        } else {
            raw.strip_prefix(prefix).unwrap_or(raw)
        };
        Self::parse(raw)
    }

    /// Parse a bare decimal string.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let trimmed = raw.trim_start_matches('0');
        let digits = if trimmed.is_empty() { "0" } else { trimmed };
        Some(Self {
            digits: digits.to_string(),
        })
    }

    /// Decimal representation without leading zeros.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.digits
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self {
            digits: value.to_string(),
        }
    }
}

impl TryFrom<String> for MessageId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid message id: {value:?}"))
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.digits
    }
}

impl PartialOrd for MessageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MessageId {
    fn cmp(&self, other: &Self) -> Ordering {
        // Normalized digit strings: a longer string is always the larger number.
        self.digits
            .len()
            .cmp(&other.digits.len())
            .then_with(|| self.digits.as_bytes().cmp(other.digits.as_bytes()))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_external_id() {
        let id = MessageId::parse_external("message-accessories-1234", DEFAULT_ID_PREFIX).unwrap();
        assert_eq!(id.as_str(), "1234");
    }

    #[test]
    fn parses_bare_id_when_prefix_absent() {
        let id = MessageId::parse_external("987", DEFAULT_ID_PREFIX).unwrap();
        assert_eq!(id, MessageId::from(987));
    }

    #[test]
    fn rejects_non_numeric_ids() {
        assert!(MessageId::parse_external("message-accessories-", DEFAULT_ID_PREFIX).is_none());
        assert!(MessageId::parse_external("message-accessories-12a4", DEFAULT_ID_PREFIX).is_none());
        assert!(MessageId::parse_external("chat-messages-1-2", DEFAULT_ID_PREFIX).is_none());
        assert!(MessageId::parse("-5").is_none());
        assert!(MessageId::parse("").is_none());
    }

    #[test]
    fn leading_zeros_are_normalized() {
        assert_eq!(MessageId::parse("000042").unwrap(), MessageId::from(42));
        assert_eq!(MessageId::parse("0000").unwrap().as_str(), "0");
    }

    #[test]
    fn ordering_is_numeric_not_lexicographic() {
        let small = MessageId::parse("99").unwrap();
        let large = MessageId::parse("100").unwrap();
        assert!(small < large);
    }

    #[test]
    fn ordering_is_exact_beyond_f64_precision() {
        // These differ only in the last digit; as f64 they compare equal.
        let a = MessageId::parse("1234567890123456789012").unwrap();
        let b = MessageId::parse("1234567890123456789013").unwrap();
        assert!(a < b);
        assert_ne!(a, b);
        #[allow(clippy::float_cmp)]
        {
            assert_eq!(
                "1234567890123456789012".parse::<f64>().unwrap(),
                "1234567890123456789013".parse::<f64>().unwrap()
            );
        }
    }

    #[test]
    fn serde_uses_decimal_string() {
        let id = MessageId::parse("1180000000000000001").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"1180000000000000001\"");
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<MessageId>("\"abc\"").is_err());
    }
}
