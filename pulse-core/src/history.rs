//! History records and their query predicates
//!
//! Records are append-only and immutable once written. Dashboards query
//! them newest first, with substring search over a text field and the
//! three score bands as first-class filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ValidationError;

/// Largest page a history query may request
pub const MAX_PAGE_LIMIT: usize = 100;

/// Common view over persisted records
pub trait Record: Clone + Send + Sync + Serialize + serde::de::DeserializeOwned + 'static {
    fn timestamp(&self) -> DateTime<Utc>;

    /// The score the record is ranked and bucketed by
    fn score(&self) -> f64;

    /// Free text searched by substring queries
    fn text(&self) -> &str;
}

/// One fused order assessment, in fixed column order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub timestamp: DateTime<Utc>,
    pub order_id: String,
    pub final_score: f64,
    pub status: String,
    pub action_taken: String,
    pub distance_km: Option<f64>,
    pub weather: Option<String>,
    pub restaurant_load: Option<String>,
    pub image_filename: String,
    pub analysis_text: String,
    pub recommendation: String,
    pub lateness_min: f64,
}

impl OrderRecord {
    /// Column order of the persisted schema
    pub const COLUMNS: [&'static str; 12] = [
        "timestamp",
        "order_id",
        "final_score",
        "status",
        "action_taken",
        "distance_km",
        "weather",
        "restaurant_load",
        "image_filename",
        "analysis_text",
        "recommendation",
        "lateness_min",
    ];
}

impl Record for OrderRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn score(&self) -> f64 {
        self.final_score
    }

    fn text(&self) -> &str {
        &self.analysis_text
    }
}

/// One scored UX session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_score: f64,
    pub raw_logs: Vec<f64>,
    pub raw_behavior: Vec<f64>,
    pub review_text: String,
}

impl Record for SessionRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn score(&self) -> f64 {
        self.session_score
    }

    fn text(&self) -> &str {
        &self.review_text
    }
}

/// Score-range predicate exposed to dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SentimentFilter {
    #[default]
    All,
    /// score > 7
    Positive,
    /// 4.5 <= score <= 7
    Neutral,
    /// score < 4.5
    Negative,
}

impl SentimentFilter {
    pub fn matches(&self, score: f64) -> bool {
        match self {
            SentimentFilter::All => true,
            SentimentFilter::Positive => score > 7.0,
            SentimentFilter::Neutral => (4.5..=7.0).contains(&score),
            SentimentFilter::Negative => score < 4.5,
        }
    }

    /// Band a single score; never returns `All`
    pub fn classify(score: f64) -> Self {
        if score > 7.0 {
            SentimentFilter::Positive
        } else if score >= 4.5 {
            SentimentFilter::Neutral
        } else {
            SentimentFilter::Negative
        }
    }
}

impl FromStr for SentimentFilter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "all" => Ok(SentimentFilter::All),
            "positive" => Ok(SentimentFilter::Positive),
            "neutral" => Ok(SentimentFilter::Neutral),
            "negative" => Ok(SentimentFilter::Negative),
            other => Err(ValidationError::Invalid {
                field: "sentiment",
                reason: format!("unknown filter {:?}", other),
            }),
        }
    }
}

/// Predicate over records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Case-insensitive substring of the record text
    pub search: Option<String>,
    pub sentiment: SentimentFilter,
}

impl HistoryFilter {
    pub fn with_search(mut self, search: &str) -> Self {
        let trimmed = search.trim();
        self.search = (!trimmed.is_empty()).then(|| trimmed.to_lowercase());
        self
    }

    pub fn with_sentiment(mut self, sentiment: SentimentFilter) -> Self {
        self.sentiment = sentiment;
        self
    }

    pub fn matches<R: Record>(&self, record: &R) -> bool {
        if !self.sentiment.matches(record.score()) {
            return false;
        }
        match &self.search {
            Some(needle) => record.text().to_lowercase().contains(&needle.to_lowercase()),
            None => true,
        }
    }
}

/// Filtered, paginated query ordered by timestamp descending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub filter: HistoryFilter,
    pub limit: usize,
    pub offset: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            filter: HistoryFilter::default(),
            limit: 20,
            offset: 0,
        }
    }
}

impl HistoryQuery {
    /// Translate 1-based page numbers into an offset
    pub fn page(page: usize, limit: usize) -> Result<Self, ValidationError> {
        if page == 0 {
            return Err(ValidationError::Invalid {
                field: "page",
                reason: "pages start at 1".to_string(),
            });
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(ValidationError::Invalid {
                field: "limit",
                reason: format!("must be between 1 and {}", MAX_PAGE_LIMIT),
            });
        }
        Ok(Self {
            filter: HistoryFilter::default(),
            limit,
            offset: (page - 1) * limit,
        })
    }

    pub fn with_filter(mut self, filter: HistoryFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Count and mean score of the records matching a filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryAggregate {
    pub count: usize,
    pub mean_score: Option<f64>,
}

impl HistoryAggregate {
    pub fn from_scores(scores: impl IntoIterator<Item = f64>) -> Self {
        let (count, total) = scores
            .into_iter()
            .fold((0usize, 0.0), |(n, sum), s| (n + 1, sum + s));
        Self {
            count,
            mean_score: (count > 0).then(|| total / count as f64),
        }
    }
}

/// Apply a query to records held in insertion order
pub fn select<R: Record>(records: &[R], query: &HistoryQuery) -> Vec<R> {
    let mut matching: Vec<&R> = records.iter().filter(|r| query.filter.matches(*r)).collect();
    // equal timestamps keep the later append first
    matching.reverse();
    matching.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    matching
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .cloned()
        .collect()
}
