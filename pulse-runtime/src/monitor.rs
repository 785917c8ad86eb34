//! Churn risk monitor
//!
//! Periodically collects the UX, delivery and food quality summaries,
//! turns them into risk factors and asks a risk model for a churn
//! percentage. Snapshots go into a [`BoundedHistory`] owned by the task.
//!
//! A source that cannot be collected or decoded leaves its factor empty.
//! Nothing is invented to fill the gap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulse_collect::SourceCollector;
use pulse_core::{CollectionReport, SignalSource};

use crate::{score_within, HttpScorer, ScoreError, Scorer, ScorerEndpoint, SharedScorer};

/// Fixed-capacity history, newest first
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Insert at the front, then drop whatever exceeds capacity
    pub fn push(&mut self, item: T) {
        self.items.push_front(item);
        self.items.truncate(self.capacity);
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.front()
    }

    /// Newest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    pub history_capacity: usize,
    pub scorer_timeout_ms: u64,
    /// Source names as configured on the collector
    pub ux_source: String,
    pub delivery_source: String,
    pub food_source: String,
    /// Snapshots averaged on the risk dashboard
    pub rolling_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            history_capacity: 100,
            scorer_timeout_ms: 2000,
            ux_source: "ux".to_string(),
            delivery_source: "delivery".to_string(),
            food_source: "food".to_string(),
            rolling_window: 20,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UxView {
    overview: UxOverviewView,
}

#[derive(Debug, Deserialize)]
struct UxOverviewView {
    rolling_average: f64,
}

#[derive(Debug, Deserialize)]
struct DeliveryView {
    kpis: DeliveryKpisView,
}

#[derive(Debug, Deserialize)]
struct DeliveryKpisView {
    overall_avg_score: f64,
}

#[derive(Debug, Deserialize)]
struct FoodView {
    #[serde(rename = "holisticScore")]
    holistic_score: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percentages fed to the risk model
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    /// `(10 - ux_avg) / 10 * 100`, at least 0
    pub ux_friction_pct: Option<f64>,
    /// `(5 - delivery_avg) / 5 * 100`, at least 0
    pub delivery_delay_pct: Option<f64>,
    /// `food_score * 100`, at least 0
    pub food_quality_pct: Option<f64>,
}

impl RiskFactors {
    pub fn from_scores(ux_avg: Option<f64>, delivery_avg: Option<f64>, food_score: Option<f64>) -> Self {
        Self {
            ux_friction_pct: ux_avg.map(|avg| round2(((10.0 - avg) / 10.0 * 100.0).max(0.0))),
            delivery_delay_pct: delivery_avg.map(|avg| round2(((5.0 - avg) / 5.0 * 100.0).max(0.0))),
            food_quality_pct: food_score.map(|score| round2((score * 100.0).max(0.0))),
        }
    }

    /// Decode the three summaries out of a collection report
    pub fn from_report(report: &CollectionReport, config: &MonitorConfig) -> (Self, BTreeMap<String, String>) {
        let mut problems = BTreeMap::new();
        let mut note = |name: &str, result: Result<f64, String>| match result {
            Ok(value) if value.is_finite() => Some(value),
            Ok(value) => {
                problems.insert(name.to_string(), format!("non-finite value {}", value));
                None
            }
            Err(e) => {
                problems.insert(name.to_string(), e);
                None
            }
        };

        let ux = note(
            &config.ux_source,
            report.decode::<UxView>(&config.ux_source).map(|v| v.overview.rolling_average),
        );
        let delivery = note(
            &config.delivery_source,
            report
                .decode::<DeliveryView>(&config.delivery_source)
                .map(|v| v.kpis.overall_avg_score),
        );
        let food = note(
            &config.food_source,
            report.decode::<FoodView>(&config.food_source).map(|v| v.holistic_score),
        );

        (Self::from_scores(ux, delivery, food), problems)
    }

    pub fn available(&self) -> usize {
        [self.ux_friction_pct, self.delivery_delay_pct, self.food_quality_pct]
            .iter()
            .filter(|f| f.is_some())
            .count()
    }
}

/// Remote churn model fed with [`RiskFactors`]
#[derive(Debug, Clone)]
pub struct RiskScorer {
    http: HttpScorer,
}

impl RiskScorer {
    pub fn new(client: Client, endpoint: ScorerEndpoint) -> Self {
        Self {
            http: HttpScorer::new("churn", client, endpoint),
        }
    }
}

#[async_trait]
impl Scorer<RiskFactors> for RiskScorer {
    async fn score(&self, factors: &RiskFactors) -> Result<f64, ScoreError> {
        self.http.call_number(factors).await
    }

    fn name(&self) -> &str {
        self.http.name()
    }
}

/// One monitor tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Predicted churn in [0, 100]; empty when no prediction could be made
    pub overall_churn_risk_percent: Option<f64>,
    pub factors: RiskFactors,
    /// Sources or model calls that failed during this tick
    pub errors: BTreeMap<String, String>,
}

/// Shared read view of the monitor history
#[derive(Debug, Clone)]
pub struct RiskBoard {
    history: Arc<RwLock<BoundedHistory<RiskSnapshot>>>,
    rolling_window: usize,
}

impl RiskBoard {
    fn new(capacity: usize, rolling_window: usize) -> Self {
        Self {
            history: Arc::new(RwLock::new(BoundedHistory::new(capacity))),
            rolling_window: rolling_window.max(1),
        }
    }

    pub fn latest(&self) -> Option<RiskSnapshot> {
        self.history.read().latest().cloned()
    }

    /// Newest first
    pub fn snapshots(&self) -> Vec<RiskSnapshot> {
        self.history.read().iter().cloned().collect()
    }

    /// Mean churn prediction over the most recent snapshots that have one
    pub fn rolling_average(&self) -> Option<f64> {
        let history = self.history.read();
        let recent: Vec<f64> = history
            .iter()
            .take(self.rolling_window)
            .filter_map(|s| s.overall_churn_risk_percent)
            .collect();
        (!recent.is_empty()).then(|| round2(recent.iter().sum::<f64>() / recent.len() as f64))
    }

    fn record(&self, snapshot: RiskSnapshot) {
        self.history.write().push(snapshot);
    }
}

/// Periodic churn risk evaluation
pub struct RiskMonitor {
    config: MonitorConfig,
    collector: SourceCollector,
    sources: Vec<SignalSource>,
    scorer: SharedScorer<RiskFactors>,
    board: RiskBoard,
}

impl RiskMonitor {
    pub fn new(
        config: MonitorConfig,
        collector: SourceCollector,
        sources: Vec<SignalSource>,
        scorer: SharedScorer<RiskFactors>,
    ) -> Self {
        let board = RiskBoard::new(config.history_capacity, config.rolling_window);
        Self {
            config,
            collector,
            sources,
            scorer,
            board,
        }
    }

    pub fn board(&self) -> RiskBoard {
        self.board.clone()
    }

    /// Collect, score and record one snapshot
    pub async fn tick(&self) -> RiskSnapshot {
        let report = self.collector.collect(&self.sources).await;
        let (factors, mut errors) = RiskFactors::from_report(&report, &self.config);

        let overall_churn_risk_percent = if factors.available() == 0 {
            debug!("No risk factors available, skipping churn model");
            None
        } else {
            let timeout = Duration::from_millis(self.config.scorer_timeout_ms);
            match score_within(self.scorer.as_ref(), &factors, timeout).await {
                Ok(raw) if raw.is_finite() => Some(round2(raw.clamp(0.0, 100.0))),
                Ok(raw) => {
                    errors.insert(self.scorer.name().to_string(), format!("non-finite prediction {}", raw));
                    None
                }
                Err(e) => {
                    warn!("Churn model failed: {}", e);
                    errors.insert(self.scorer.name().to_string(), e.to_string());
                    None
                }
            }
        };

        let snapshot = RiskSnapshot {
            timestamp: Utc::now(),
            overall_churn_risk_percent,
            factors,
            errors,
        };
        self.board.record(snapshot.clone());
        snapshot
    }

    /// Tick every `interval_ms` until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_millis(self.config.interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Risk monitor polling {} sources every {}ms",
            self.sources.len(),
            self.config.interval_ms
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = tokio::select! {
                _ = cancel.cancelled() => break,
                snapshot = self.tick() => snapshot,
            };

            match snapshot.overall_churn_risk_percent {
                Some(risk) => info!("Churn risk {:.2}% ({} factors)", risk, snapshot.factors.available()),
                None => warn!("No churn prediction this tick ({} errors)", snapshot.errors.len()),
            }
        }

        info!("Risk monitor stopped");
    }

    pub fn spawn(self) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let board = self.board();
        let task = tokio::spawn(self.run(cancel.clone()));
        MonitorHandle { cancel, board, task }
    }
}

/// Handle to a spawned monitor
pub struct MonitorHandle {
    cancel: CancellationToken,
    board: RiskBoard,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn board(&self) -> RiskBoard {
        self.board.clone()
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.cancel.cancel();
        self.task.await?;
        Ok(())
    }
}
