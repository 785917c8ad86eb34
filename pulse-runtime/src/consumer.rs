//! Stream consumer
//!
//! Pulls reviews from a [`StreamLog`], scores each one and keeps a rolling
//! quality window:
//! - Poll up to `batch_size` entries after the cursor, blocking up to
//!   `poll_timeout_ms`; when nothing arrives wait `retry_interval_ms`
//! - Entries are scored in arrival order, each call bounded by
//!   `scorer_timeout_ms`
//! - The cursor moves past every entry, scored or not
//! - After each non-empty batch the aggregate is persisted and the
//!   dashboard board is refreshed
//!
//! Shutdown only interrupts the wait for new entries. A batch that has
//! been read is scored and persisted before the consumer stops.
//!
//! The cursor lives in memory only. A restart begins again at
//! `start_cursor`, so entries may be scored twice.

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pulse_core::{QualityAggregate, QualityLabel, StreamId, WindowBuffer, DEFAULT_WINDOW_CAPACITY};
use pulse_store::{AggregateStore, StoreError};

use crate::{score_within, ScoreError, SharedScorer, SharedStream, StreamError, StreamItem};

/// What happens to an entry whose scorer call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log and move on
    #[default]
    Skip,
    /// Retry with exponential backoff, then skip
    Retry { attempts: u32, backoff_ms: u64 },
}

impl FailurePolicy {
    fn attempts(&self) -> u32 {
        match self {
            FailurePolicy::Skip => 1,
            FailurePolicy::Retry { attempts, .. } => attempts.saturating_add(1),
        }
    }

    /// Delay before retry number `retry` (1-based), with up to 25% jitter
    fn backoff(&self, retry: u32) -> Duration {
        match self {
            FailurePolicy::Skip => Duration::ZERO,
            FailurePolicy::Retry { backoff_ms, .. } => {
                let base = backoff_ms.saturating_mul(1u64 << retry.saturating_sub(1).min(16));
                let jitter = rand::thread_rng().gen_range(0..=base / 4);
                Duration::from_millis(base + jitter)
            }
        }
    }
}

/// Consumer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Maximum entries per poll
    pub batch_size: usize,
    /// How long one poll may block waiting for entries
    pub poll_timeout_ms: u64,
    /// Pause after an empty poll or a failed batch
    pub retry_interval_ms: u64,
    /// Bound on each scorer call
    pub scorer_timeout_ms: u64,
    /// Entry field holding the text to score
    pub text_field: String,
    pub window_capacity: usize,
    /// Where a fresh consumer starts reading
    pub start_cursor: StreamId,
    pub failure_policy: FailurePolicy,
    /// Entries shown on the quality dashboard
    pub recent_entries: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_timeout_ms: 5000,
            retry_interval_ms: 1000,
            scorer_timeout_ms: 10_000,
            text_field: "review".to_string(),
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            start_cursor: StreamId::ZERO,
            failure_policy: FailurePolicy::Skip,
            recent_entries: 10,
        }
    }
}

impl ConsumerConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_window_capacity(mut self, capacity: usize) -> Self {
        self.window_capacity = capacity;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_scorer_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.scorer_timeout_ms = timeout_ms;
        self
    }
}

/// Consumer errors
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A review kept in the quality window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredReview {
    pub id: StreamId,
    pub text: String,
}

/// One row of the quality dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentReview {
    pub id: StreamId,
    pub text: String,
    pub score: f64,
    pub label: QualityLabel,
}

/// What the quality dashboard shows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub aggregate: Option<QualityAggregate>,
    /// Newest first
    pub recent: Vec<RecentReview>,
}

/// Read-only view the consumer publishes after every batch
#[derive(Debug, Clone, Default)]
pub struct QualityBoard {
    inner: Arc<RwLock<QualitySnapshot>>,
}

impl QualityBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> QualitySnapshot {
        self.inner.read().clone()
    }

    fn publish(&self, snapshot: QualitySnapshot) {
        *self.inner.write() = snapshot;
    }
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub read: usize,
    pub scored: usize,
    pub failed: usize,
    pub cursor: StreamId,
    pub aggregate: Option<QualityAggregate>,
}

/// Owns the cursor and the window; one per stream
pub struct StreamConsumer {
    config: ConsumerConfig,
    log: SharedStream,
    scorer: SharedScorer<str>,
    aggregates: Arc<dyn AggregateStore>,
    window: WindowBuffer<ScoredReview>,
    cursor: StreamId,
    board: QualityBoard,
}

impl StreamConsumer {
    pub fn new(
        config: ConsumerConfig,
        log: SharedStream,
        scorer: SharedScorer<str>,
        aggregates: Arc<dyn AggregateStore>,
    ) -> Self {
        let window = WindowBuffer::new(config.window_capacity);
        let cursor = config.start_cursor;
        Self {
            config,
            log,
            scorer,
            aggregates,
            window,
            cursor,
            board: QualityBoard::new(),
        }
    }

    pub fn cursor(&self) -> StreamId {
        self.cursor
    }

    pub fn window(&self) -> &WindowBuffer<ScoredReview> {
        &self.window
    }

    /// Handle for dashboards; stays valid after the consumer is spawned
    pub fn board(&self) -> QualityBoard {
        self.board.clone()
    }

    /// Poll once and process whatever arrived
    pub async fn poll_once(&mut self) -> Result<BatchOutcome, ConsumerError> {
        let items = self.read_batch().await?;
        self.process_batch(items).await
    }

    /// Wait for the next batch after the cursor; holds no consumer state
    async fn read_batch(&self) -> Result<Vec<StreamItem>, StreamError> {
        self.log
            .read_after(
                self.cursor,
                self.config.batch_size.max(1),
                Duration::from_millis(self.config.poll_timeout_ms),
            )
            .await
    }

    /// Score a batch that was already read, advancing the cursor past every entry
    pub async fn process_batch(&mut self, items: Vec<StreamItem>) -> Result<BatchOutcome, ConsumerError> {
        let mut outcome = BatchOutcome {
            read: items.len(),
            scored: 0,
            failed: 0,
            cursor: self.cursor,
            aggregate: None,
        };

        if items.is_empty() {
            return Ok(outcome);
        }

        for item in items {
            let scored = match item.field(&self.config.text_field) {
                Some(text) => self
                    .score_with_policy(item.id, text)
                    .await
                    .map(|score| (text.to_string(), score)),
                None => {
                    warn!(
                        "Stream entry {} has no {} field, skipping",
                        item.id, self.config.text_field
                    );
                    None
                }
            };

            match scored {
                Some((text, score)) => {
                    self.window.push(ScoredReview { id: item.id, text }, score);
                    outcome.scored += 1;
                }
                None => outcome.failed += 1,
            }

            self.cursor = item.id;
        }
        outcome.cursor = self.cursor;

        if let Some(aggregate) = self.window.aggregate() {
            self.aggregates.store(&aggregate)?;
            debug!(
                "Rolling quality {:.3} ({}) over {} reviews",
                aggregate.rolling_mean, aggregate.label, aggregate.window_len
            );
            outcome.aggregate = Some(aggregate);
        }
        self.publish();

        Ok(outcome)
    }

    async fn score_with_policy(&self, id: StreamId, text: &str) -> Option<f64> {
        let policy = self.config.failure_policy;
        let timeout = Duration::from_millis(self.config.scorer_timeout_ms);
        let attempts = policy.attempts();

        for attempt in 1..=attempts {
            let result: Result<f64, ScoreError> = score_within(self.scorer.as_ref(), text, timeout).await;
            match result {
                Ok(score) if score.is_finite() => return Some(score),
                Ok(score) => warn!("Scorer {} returned {} for entry {}", self.scorer.name(), score, id),
                Err(e) => warn!(
                    "Scoring entry {} failed (attempt {}/{}): {}",
                    id, attempt, attempts, e
                ),
            }

            if attempt < attempts {
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
        }

        None
    }

    fn publish(&self) {
        let recent = self
            .window
            .recent(self.config.recent_entries)
            .rev()
            .map(|entry| RecentReview {
                id: entry.item.id,
                text: entry.item.text.clone(),
                score: entry.score,
                label: QualityLabel::from_score(entry.score),
            })
            .collect();

        self.board.publish(QualitySnapshot {
            aggregate: self.window.aggregate(),
            recent,
        });
    }

    /// Poll until cancelled, returning the consumer so its state can be inspected
    pub async fn run(mut self, cancel: CancellationToken) -> Self {
        let retry = Duration::from_millis(self.config.retry_interval_ms);
        info!("Stream consumer starting at cursor {}", self.cursor);

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = self.read_batch() => read,
            };

            // once read, a batch is always finished before shutdown is honoured
            let polled = match read {
                Ok(items) => self.process_batch(items).await,
                Err(e) => Err(e.into()),
            };

            let idle = match polled {
                Ok(outcome) if outcome.read == 0 => true,
                Ok(outcome) => {
                    debug!(
                        "Batch done: {} read, {} scored, {} failed, cursor {}",
                        outcome.read, outcome.scored, outcome.failed, outcome.cursor
                    );
                    false
                }
                Err(e) => {
                    error!("Stream consumer batch failed: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry) => {}
                }
            }
        }

        info!("Stream consumer stopped at cursor {}", self.cursor);
        self
    }

    /// Run on a background task
    pub fn spawn(self) -> ConsumerHandle {
        let cancel = CancellationToken::new();
        let board = self.board();
        let task = tokio::spawn(self.run(cancel.clone()));
        ConsumerHandle { cancel, board, task }
    }
}

/// Handle to a spawned consumer
pub struct ConsumerHandle {
    cancel: CancellationToken,
    board: QualityBoard,
    task: JoinHandle<StreamConsumer>,
}

impl ConsumerHandle {
    pub fn board(&self) -> QualityBoard {
        self.board.clone()
    }

    /// Stop the consumer and wait for it to finish
    pub async fn shutdown(self) -> anyhow::Result<StreamConsumer> {
        self.cancel.cancel();
        Ok(self.task.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FnScorer, MemoryStreamLog, ReviewProducer, Scorer, StreamFields, StreamLog};
    use async_trait::async_trait;
    use pulse_store::MemoryAggregateStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores "good" text high, "bad" low and fails on "boom"
    fn keyword_scorer() -> SharedScorer<str> {
        Arc::new(FnScorer::new("keywords", |text: &str| {
            if text.contains("boom") {
                Err(ScoreError::Status(500))
            } else if text.contains("good") {
                Ok(0.9)
            } else {
                Ok(0.1)
            }
        }))
    }

    struct Fixture {
        log: Arc<MemoryStreamLog>,
        producer: ReviewProducer,
        aggregates: Arc<MemoryAggregateStore>,
    }

    fn fixture() -> Fixture {
        let log = Arc::new(MemoryStreamLog::new());
        Fixture {
            producer: ReviewProducer::new(log.clone(), "review"),
            log,
            aggregates: Arc::new(MemoryAggregateStore::new()),
        }
    }

    impl Fixture {
        fn consumer(&self, config: ConsumerConfig, scorer: SharedScorer<str>) -> StreamConsumer {
            StreamConsumer::new(config, self.log.clone(), scorer, self.aggregates.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_scores_and_advances_past_failures() {
        let fx = fixture();
        fx.producer.append("good food").await.unwrap();
        fx.producer.append("boom").await.unwrap();
        let mut other = StreamFields::new();
        other.insert("title".to_string(), "no review here".to_string());
        fx.log.append(other).await.unwrap();
        let last = fx.producer.append("cold and bad").await.unwrap();

        let mut consumer = fx.consumer(ConsumerConfig::default(), keyword_scorer());
        let outcome = consumer.poll_once().await.unwrap();

        assert_eq!(outcome.read, 4);
        assert_eq!(outcome.scored, 2);
        assert_eq!(outcome.failed, 2);
        assert_eq!(consumer.cursor(), last);
        assert_eq!(consumer.window().len(), 2);

        let stored = fx.aggregates.load().unwrap().unwrap();
        assert!((stored.rolling_mean - 0.5).abs() < 1e-9);
        assert_eq!(stored.label, QualityLabel::SlightlyGood);

        let board = consumer.board().snapshot();
        assert_eq!(board.recent.len(), 2);
        assert_eq!(board.recent[0].text, "cold and bad");
        assert_eq!(board.recent[0].label, QualityLabel::ExtremelyBad);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_respect_size_and_window_capacity() {
        let fx = fixture();
        for i in 0..15 {
            fx.producer.append(&format!("good #{}", i)).await.unwrap();
        }

        let config = ConsumerConfig::default().with_window_capacity(4);
        let mut consumer = fx.consumer(config, keyword_scorer());

        assert_eq!(consumer.poll_once().await.unwrap().read, 10);
        assert_eq!(consumer.poll_once().await.unwrap().read, 5);
        assert_eq!(consumer.window().len(), 4);

        let retained: Vec<String> = consumer.window().entries().map(|e| e.item.text.clone()).collect();
        assert_eq!(retained, vec!["good #11", "good #12", "good #13", "good #14"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_poll_leaves_aggregate_alone() {
        let fx = fixture();
        let mut consumer = fx.consumer(ConsumerConfig::default(), keyword_scorer());

        let outcome = consumer.poll_once().await.unwrap();
        assert_eq!(outcome.read, 0);
        assert_eq!(outcome.cursor, StreamId::ZERO);
        assert!(fx.aggregates.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_recovers_flaky_scorer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let flaky: SharedScorer<str> = Arc::new(FnScorer::new("flaky", move |_text: &str| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ScoreError::Network("reset".to_string()))
            } else {
                Ok(0.7)
            }
        }));

        let fx = fixture();
        fx.producer.append("anything").await.unwrap();

        let config = ConsumerConfig::default().with_failure_policy(FailurePolicy::Retry {
            attempts: 3,
            backoff_ms: 100,
        });
        let mut consumer = fx.consumer(config, flaky);
        let outcome = consumer.poll_once().await.unwrap();

        assert_eq!(outcome.scored, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    struct Hung;

    #[async_trait]
    impl Scorer<str> for Hung {
        async fn score(&self, _input: &str) -> Result<f64, ScoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(1.0)
        }

        fn name(&self) -> &str {
            "hung"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_scorer_is_bounded() {
        let fx = fixture();
        let id = fx.producer.append("never scored").await.unwrap();

        let config = ConsumerConfig::default().with_scorer_timeout_ms(500);
        let mut consumer = fx.consumer(config, Arc::new(Hung));
        let outcome = consumer.poll_once().await.unwrap();

        assert_eq!(outcome.failed, 1);
        assert_eq!(consumer.cursor(), id);
        assert!(consumer.window().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_consumer_follows_stream_until_shutdown() {
        let fx = fixture();
        let handle = fx.consumer(ConsumerConfig::default(), keyword_scorer()).spawn();
        let board = handle.board();

        tokio::time::sleep(Duration::from_millis(50)).await;
        for text in ["good", "good", "bad"] {
            fx.producer.append(text).await.unwrap();
        }

        for _ in 0..100 {
            if board.snapshot().recent.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let consumer = handle.shutdown().await.unwrap();
        assert_eq!(consumer.window().len(), 3);
        let aggregate = board.snapshot().aggregate.unwrap();
        assert!((aggregate.rolling_mean - (0.9 + 0.9 + 0.1) / 3.0).abs() < 1e-9);
    }

    struct Slow;

    #[async_trait]
    impl Scorer<str> for Slow {
        async fn score(&self, _input: &str) -> Result<f64, ScoreError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(0.6)
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_finishes_batch_in_flight() {
        let fx = fixture();
        let first = fx.producer.append("first").await.unwrap();
        let second = fx.producer.append("second").await.unwrap();

        let handle = fx.consumer(ConsumerConfig::default(), Arc::new(Slow)).spawn();

        // shut down while the first entry is still being scored
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fx.aggregates.load().unwrap().is_none());
        let consumer = handle.shutdown().await.unwrap();

        assert_eq!(consumer.cursor(), second);
        assert_eq!(consumer.window().len(), 2);
        assert!(first < second);

        let stored = fx.aggregates.load().unwrap().unwrap();
        assert_eq!(stored.window_len, 2);
        assert!((stored.rolling_mean - 0.6).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_board_lists_newest_first_up_to_limit() {
        let fx = fixture();
        for text in ["good 1", "bad 2", "good 3", "bad 4", "good 5"] {
            fx.producer.append(text).await.unwrap();
        }

        let config = ConsumerConfig {
            recent_entries: 3,
            ..Default::default()
        };
        let mut consumer = fx.consumer(config, keyword_scorer());
        consumer.poll_once().await.unwrap();

        let board = consumer.board().snapshot();
        let texts: Vec<&str> = board.recent.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["good 5", "bad 4", "good 3"]);
        assert!(board.recent.windows(2).all(|pair| pair[0].id > pair[1].id));
        assert_eq!(board.aggregate.unwrap().window_len, 5);
    }

    #[test]
    fn test_failure_policy_serde() {
        let skip: FailurePolicy = serde_json::from_str(r#"{"policy": "skip"}"#).unwrap();
        assert_eq!(skip, FailurePolicy::Skip);

        let retry: FailurePolicy =
            serde_json::from_str(r#"{"policy": "retry", "attempts": 2, "backoff_ms": 50}"#).unwrap();
        assert_eq!(retry.attempts(), 3);
        let delay = retry.backoff(2);
        assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(125));
    }
}
