use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Compound log entry id: `<millis>-<seq>`.
///
/// Ordering is by milliseconds first, then sequence, matching range-query
/// semantics of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub millis: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: Self = Self { millis: 0, seq: 0 };
    pub const MAX: Self = Self {
        millis: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Id for a timestamp with sequence 0.
    pub fn from_millis(millis: u64) -> Self {
        Self { millis, seq: 0 }
    }

    /// Same millisecond, next sequence number.
    pub fn next_seq(self) -> Option<Self> {
        self.seq.checked_add(1).map(|seq| Self { seq, ..self })
    }

    /// Big-endian key bytes; byte order equals id order.
    pub fn to_key(self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&self.millis.to_be_bytes());
        key[8..].copy_from_slice(&self.seq.to_be_bytes());
        key
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        let millis = u64::from_be_bytes(key.get(..8)?.try_into().ok()?);
        let seq = u64::from_be_bytes(key.get(8..16)?.try_into().ok()?);
        Some(Self { millis, seq })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

/// Error returned when a string is not a valid `<millis>-<seq>` id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid stream id: {0:?}")]
pub struct ParseStreamIdError(pub String);

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    /// Accepts `<millis>-<seq>` or a bare `<millis>` (sequence 0).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseStreamIdError(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((m, q)) => (m, q),
            None => (s, "0"),
        };
        if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        Ok(Self {
            millis: millis.parse().map_err(|_| err())?,
            seq: seq.parse().map_err(|_| err())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_as_compound_ordinal() {
        assert_eq!(StreamId::from_millis(1_700_000_000_123).to_string(), "1700000000123-0");
        assert_eq!(StreamId::new(5, 2).to_string(), "5-2");
    }

    #[test]
    fn parses_full_and_bare_forms() {
        assert_eq!("42-7".parse::<StreamId>().unwrap(), StreamId::new(42, 7));
        assert_eq!("42".parse::<StreamId>().unwrap(), StreamId::new(42, 0));
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "-", "abc", "1-", "-1", "1-2-3", "+1-0", "1.5-0"] {
            assert!(bad.parse::<StreamId>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn key_order_matches_id_order() {
        let ids = [
            StreamId::new(1, 0),
            StreamId::new(1, 1),
            StreamId::new(2, 0),
            StreamId::new(256, 0),
        ];
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].to_key() < pair[1].to_key());
        }
        assert_eq!(StreamId::from_key(&ids[3].to_key()), Some(ids[3]));
        assert_eq!(StreamId::from_key(&[0u8; 4]), None);
    }

    #[test]
    fn next_seq_saturates() {
        assert_eq!(StreamId::new(9, 0).next_seq(), Some(StreamId::new(9, 1)));
        assert_eq!(StreamId::new(9, u64::MAX).next_seq(), None);
    }
}
