//! Scorer abstraction
//!
//! A scorer turns one input into a number (or a category). Models live
//! behind HTTP endpoints; the runtime only knows this trait:
//! - [`TextScorer`]: `{"review": text}` -> `{"score": f}`
//! - [`SessionScorer`]: session features -> raw session score
//! - [`PackagingClassifier`]: image reference -> intact / damaged
//! - [`FnScorer`]: wraps a closure for local rules and tests

use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use pulse_core::{PackagingStatus, SessionInput};

/// Scorer errors
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Scorer returned status {0}")]
    Status(u16),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Scorer timed out after {0}ms")]
    Timeout(u64),

    #[error("Scorer rejected input: {0}")]
    Rejected(String),
}

/// Maps an input to a score
#[async_trait]
pub trait Scorer<I: ?Sized + Sync, O = f64>: Send + Sync {
    async fn score(&self, input: &I) -> Result<O, ScoreError>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Shared scorer handle
pub type SharedScorer<I, O = f64> = Arc<dyn Scorer<I, O>>;

/// Invoke a scorer, giving up after `timeout`
///
/// The returned future is boxed as `Send` so callers that are spawned
/// onto the runtime can hold it across awaits.
pub fn score_within<'a, I, O>(
    scorer: &'a dyn Scorer<I, O>,
    input: &'a I,
    timeout: Duration,
) -> BoxFuture<'a, Result<O, ScoreError>>
where
    I: ?Sized + Sync,
    O: Send + 'a,
{
    Box::pin(async move {
        match tokio::time::timeout(timeout, scorer.score(input)).await {
            Ok(result) => result,
            Err(_) => Err(ScoreError::Timeout(timeout.as_millis() as u64)),
        }
    })
}

/// Endpoint configuration for an HTTP scorer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerEndpoint {
    pub url: String,
    /// Field of the JSON response holding the result
    pub response_field: String,
}

impl Default for ScorerEndpoint {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/predict".to_string(),
            response_field: "score".to_string(),
        }
    }
}

impl ScorerEndpoint {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn with_response_field(mut self, field: &str) -> Self {
        self.response_field = field.to_string();
        self
    }
}

/// JSON-over-HTTP transport shared by the concrete scorers
#[derive(Debug, Clone)]
pub struct HttpScorer {
    client: Client,
    name: String,
    endpoint: ScorerEndpoint,
}

impl HttpScorer {
    pub fn new(name: &str, client: Client, endpoint: ScorerEndpoint) -> Self {
        Self {
            client,
            name: name.to_string(),
            endpoint,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// POST `body` and return the configured response field
    pub async fn call<B: Serialize + Sync + ?Sized>(&self, body: &B) -> Result<serde_json::Value, ScoreError> {
        let response = self
            .client
            .post(&self.endpoint.url)
            .json(body)
            .send()
            .await
            .map_err(|e| ScoreError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoreError::Status(status.as_u16()));
        }

        let mut payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ScoreError::Parse(e.to_string()))?;

        debug!("Scorer {} answered {}", self.name, payload);

        payload
            .get_mut(&self.endpoint.response_field)
            .map(serde_json::Value::take)
            .ok_or_else(|| ScoreError::Parse(format!("missing field {:?}", self.endpoint.response_field)))
    }

    /// POST `body` and read a finite number back
    pub async fn call_number<B: Serialize + Sync + ?Sized>(&self, body: &B) -> Result<f64, ScoreError> {
        let value = self.call(body).await?;
        value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ScoreError::Parse(format!("expected a number, got {}", value)))
    }
}

#[derive(Serialize)]
struct ReviewRequest<'a> {
    review: &'a str,
}

/// Scores review text into [0, 1]
#[derive(Debug, Clone)]
pub struct TextScorer {
    http: HttpScorer,
}

impl TextScorer {
    pub fn new(client: Client, endpoint: ScorerEndpoint) -> Self {
        Self {
            http: HttpScorer::new("text", client, endpoint),
        }
    }
}

#[async_trait]
impl Scorer<str> for TextScorer {
    async fn score(&self, text: &str) -> Result<f64, ScoreError> {
        let score = self.http.call_number(&ReviewRequest { review: text }).await?;
        if !(0.0..=1.0).contains(&score) {
            return Err(ScoreError::Parse(format!("score {} outside [0, 1]", score)));
        }
        Ok(score)
    }

    fn name(&self) -> &str {
        self.http.name()
    }
}

/// Produces the raw (uncalibrated) score of a UX session
#[derive(Debug, Clone)]
pub struct SessionScorer {
    http: HttpScorer,
}

impl SessionScorer {
    pub fn new(client: Client, endpoint: ScorerEndpoint) -> Self {
        Self {
            http: HttpScorer::new("session", client, endpoint),
        }
    }
}

#[async_trait]
impl Scorer<SessionInput> for SessionScorer {
    async fn score(&self, input: &SessionInput) -> Result<f64, ScoreError> {
        self.http.call_number(input).await
    }

    fn name(&self) -> &str {
        self.http.name()
    }
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    image: &'a str,
}

/// Classifies a package photo as intact or damaged
#[derive(Debug, Clone)]
pub struct PackagingClassifier {
    http: HttpScorer,
}

impl PackagingClassifier {
    pub fn new(client: Client, endpoint: ScorerEndpoint) -> Self {
        Self {
            http: HttpScorer::new("packaging", client, endpoint),
        }
    }
}

/// Map a classifier label onto a packaging status
pub fn parse_packaging_label(label: &str) -> Result<PackagingStatus, ScoreError> {
    match label.trim().to_ascii_lowercase().as_str() {
        "intact" | "good" | "excellent" => Ok(PackagingStatus::Intact),
        "damaged" | "damage" => Ok(PackagingStatus::Damaged),
        other => Err(ScoreError::Parse(format!("unknown packaging label {:?}", other))),
    }
}

#[async_trait]
impl Scorer<str, PackagingStatus> for PackagingClassifier {
    async fn score(&self, image: &str) -> Result<PackagingStatus, ScoreError> {
        let value = self.http.call(&ImageRequest { image }).await?;
        let label = value
            .as_str()
            .ok_or_else(|| ScoreError::Parse(format!("expected a label, got {}", value)))?;
        parse_packaging_label(label)
    }

    fn name(&self) -> &str {
        self.http.name()
    }
}

/// Scorer backed by a plain function
pub struct FnScorer<I: ?Sized, O, F> {
    name: String,
    f: F,
    _io: PhantomData<fn(&I) -> O>,
}

impl<I: ?Sized, O, F> FnScorer<I, O, F>
where
    F: Fn(&I) -> Result<O, ScoreError> + Send + Sync,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
            _io: PhantomData,
        }
    }
}

#[async_trait]
impl<I, O, F> Scorer<I, O> for FnScorer<I, O, F>
where
    I: ?Sized + Sync,
    O: Send,
    F: Fn(&I) -> Result<O, ScoreError> + Send + Sync,
{
    async fn score(&self, input: &I) -> Result<O, ScoreError> {
        (self.f)(input)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
