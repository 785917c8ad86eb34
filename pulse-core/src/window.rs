//! Rolling quality window
//!
//! A fixed-capacity FIFO of recently scored items:
//! - Inserts append at the back, evicting from the front once full
//! - The rolling mean and its quality label are recomputed on every insert
//! - Owned by exactly one consumer, so no internal locking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Eight ordered quality levels over a score in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityLabel {
    #[serde(rename = "Extremely Bad")]
    ExtremelyBad,
    #[serde(rename = "Very Bad")]
    VeryBad,
    Bad,
    #[serde(rename = "Slightly Bad")]
    SlightlyBad,
    #[serde(rename = "Slightly Good")]
    SlightlyGood,
    Good,
    #[serde(rename = "Very Good")]
    VeryGood,
    Excellent,
}

impl QualityLabel {
    pub const ALL: [QualityLabel; 8] = [
        QualityLabel::ExtremelyBad,
        QualityLabel::VeryBad,
        QualityLabel::Bad,
        QualityLabel::SlightlyBad,
        QualityLabel::SlightlyGood,
        QualityLabel::Good,
        QualityLabel::VeryGood,
        QualityLabel::Excellent,
    ];

    /// Bucket a score; each bucket is 0.125 wide, values outside [0, 1] clamp
    pub fn from_score(score: f64) -> Self {
        // NaN casts to 0 and lands in the lowest bucket
        let bucket = (score.clamp(0.0, 1.0) * 8.0).floor() as usize;
        Self::ALL[bucket.min(7)]
    }

    /// Inclusive lower bound of this bucket
    pub fn lower_bound(&self) -> f64 {
        *self as usize as f64 * 0.125
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLabel::ExtremelyBad => "Extremely Bad",
            QualityLabel::VeryBad => "Very Bad",
            QualityLabel::Bad => "Bad",
            QualityLabel::SlightlyBad => "Slightly Bad",
            QualityLabel::SlightlyGood => "Slightly Good",
            QualityLabel::Good => "Good",
            QualityLabel::VeryGood => "Very Good",
            QualityLabel::Excellent => "Excellent",
        }
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored item held by the window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry<T> {
    pub item: T,
    pub score: f64,
}

/// Current rolling statistic, overwritten after every batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAggregate {
    pub rolling_mean: f64,
    pub label: QualityLabel,
    pub window_len: usize,
    pub updated_at: DateTime<Utc>,
}

/// Fixed-capacity FIFO of scored entries, newest last
#[derive(Debug, Clone)]
pub struct WindowBuffer<T> {
    capacity: usize,
    entries: VecDeque<WindowEntry<T>>,
    mean: Option<f64>,
}

impl<T> WindowBuffer<T> {
    /// Create a window; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            mean: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, returning the one evicted to stay within capacity
    pub fn push(&mut self, item: T, score: f64) -> Option<WindowEntry<T>> {
        self.entries.push_back(WindowEntry { item, score });
        let evicted = if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.recompute();
        evicted
    }

    fn recompute(&mut self) {
        self.mean = if self.entries.is_empty() {
            None
        } else {
            let total: f64 = self.entries.iter().map(|e| e.score).sum();
            Some(total / self.entries.len() as f64)
        };
    }

    /// Arithmetic mean of every retained score
    pub fn mean(&self) -> Option<f64> {
        self.mean
    }

    pub fn label(&self) -> Option<QualityLabel> {
        self.mean.map(QualityLabel::from_score)
    }

    /// Snapshot of the rolling statistic, if anything has been scored
    pub fn aggregate(&self) -> Option<QualityAggregate> {
        self.mean.map(|mean| QualityAggregate {
            rolling_mean: mean,
            label: QualityLabel::from_score(mean),
            window_len: self.entries.len(),
            updated_at: Utc::now(),
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry<T>> {
        self.entries.iter()
    }

    /// The most recent `n` entries, oldest first
    pub fn recent(&self, n: usize) -> impl DoubleEndedIterator<Item = &WindowEntry<T>> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }
}
