//! Stream cursors
//!
//! Positions in an append-only log are `<millis>-<seq>` pairs, ordered
//! first by the millisecond timestamp and then by the sequence number.
//! `0-0` sits before every real entry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ValidationError;

/// Totally-ordered position of a stream entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub millis: u64,
    pub seq: u64,
}

impl StreamId {
    /// Position before the first entry of any stream
    pub const ZERO: StreamId = StreamId { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Smallest id strictly greater than `self` that is valid at `now_millis`
    pub fn next_after(&self, now_millis: u64) -> Self {
        if now_millis > self.millis {
            StreamId::new(now_millis, 0)
        } else {
            StreamId::new(self.millis, self.seq + 1)
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ValidationError::Invalid {
            field: "cursor",
            reason: format!("{} ({:?})", reason, s),
        };

        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, seq),
            None => (s, "0"),
        };

        let millis = millis.parse().map_err(|_| invalid("bad millisecond part"))?;
        let seq = seq.parse().map_err(|_| invalid("bad sequence part"))?;
        Ok(StreamId::new(millis, seq))
    }
}

impl Serialize for StreamId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
