//! Upstream signal sources and collection outcomes
//!
//! Every dashboard exposes a read endpoint. A collection pass fans out to
//! a set of [`SignalSource`]s and produces exactly one [`SourceOutcome`]
//! per source name. Outcomes are a tagged union so callers never have to
//! guess at the shape of a failed fetch.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default per-source timeout in milliseconds
pub const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 2000;

/// A named upstream endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSource {
    /// Key used in the merged response
    pub name: String,
    /// Absolute URL of the read endpoint
    pub endpoint: String,
    /// Per-fetch timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_SOURCE_TIMEOUT_MS
}

impl SignalSource {
    pub fn new(name: &str, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            timeout_ms: DEFAULT_SOURCE_TIMEOUT_MS,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Result of fetching one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireOutcome", into = "WireOutcome")]
pub enum SourceOutcome {
    /// Parsed JSON payload
    Success(serde_json::Value),
    /// Human-readable failure reason
    Error(String),
}

impl SourceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SourceOutcome::Success(_))
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            SourceOutcome::Success(value) => Some(value),
            SourceOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SourceOutcome::Success(_) => None,
            SourceOutcome::Error(msg) => Some(msg),
        }
    }

    /// Validate the payload against a typed schema
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, String> {
        match self {
            SourceOutcome::Success(value) => {
                serde_json::from_value(value.clone()).map_err(|e| format!("schema mismatch: {}", e))
            }
            SourceOutcome::Error(msg) => Err(msg.clone()),
        }
    }
}

/// Wire status of a source entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    Error,
}

/// `{"status": .., "data": .., "error": ..}` as rendered to dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireOutcome {
    status: SourceStatus,
    data: Option<serde_json::Value>,
    error: Option<String>,
}

impl From<SourceOutcome> for WireOutcome {
    fn from(outcome: SourceOutcome) -> Self {
        match outcome {
            SourceOutcome::Success(data) => WireOutcome {
                status: SourceStatus::Success,
                data: Some(data),
                error: None,
            },
            SourceOutcome::Error(error) => WireOutcome {
                status: SourceStatus::Error,
                data: None,
                error: Some(error),
            },
        }
    }
}

impl TryFrom<WireOutcome> for SourceOutcome {
    type Error = String;

    fn try_from(wire: WireOutcome) -> Result<Self, String> {
        match wire.status {
            SourceStatus::Success => wire
                .data
                .map(SourceOutcome::Success)
                .ok_or_else(|| "success entry without data".to_string()),
            SourceStatus::Error => Ok(SourceOutcome::Error(
                wire.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }
}

/// Outcome of a single fetch, before merging
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionResult {
    pub name: String,
    pub outcome: SourceOutcome,
}

impl CollectionResult {
    pub fn success(name: &str, payload: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            outcome: SourceOutcome::Success(payload),
        }
    }

    pub fn error(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            outcome: SourceOutcome::Error(message.into()),
        }
    }
}

/// Merged view of one collection pass, keyed by source name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionReport {
    entries: BTreeMap<String, SourceOutcome>,
}

impl CollectionReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a result, keeping the first outcome recorded for a name
    pub fn insert(&mut self, result: CollectionResult) {
        self.entries.entry(result.name).or_insert(result.outcome);
    }

    pub fn get(&self, name: &str) -> Option<&SourceOutcome> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn success_count(&self) -> usize {
        self.entries.values().filter(|o| o.is_success()).count()
    }

    pub fn error_count(&self) -> usize {
        self.entries.len() - self.success_count()
    }

    /// Decode one source's payload; absent sources are reported as errors
    pub fn decode<T: DeserializeOwned>(&self, name: &str) -> Result<T, String> {
        self.entries
            .get(name)
            .ok_or_else(|| format!("source {} was not collected", name))?
            .decode()
    }
}

impl FromIterator<CollectionResult> for CollectionReport {
    fn from_iter<I: IntoIterator<Item = CollectionResult>>(iter: I) -> Self {
        let mut report = CollectionReport::new();
        for result in iter {
            report.insert(result);
        }
        report
    }
}
