//! Per-event scoring pipelines
//!
//! Each pipeline scores one event, records it in history and folds the
//! result into a decay state:
//! - [`SessionPipeline`]: UX session -> calibrated session score
//! - [`OrderPipeline`]: delivered order -> fused delivery score
//!
//! Validation runs before anything is written. A history append that
//! succeeds is not rolled back if the state update fails afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use pulse_core::{
    assess, calibrate_session_score, lateness_minutes, AlertStatus, DeliveryContext, FusionReport,
    FusionWeights, GlobalState, OrderRecord, OrderSignals, PackagingStatus, SessionInput, SessionRecord,
    ValidationError,
};
use pulse_store::{DecayStateStore, HistoryLog, StoreError};

use crate::{score_within, ScoreError, SharedScorer};

/// Default bound on a pipeline scorer call
pub const DEFAULT_SCORER_TIMEOUT: Duration = Duration::from_secs(10);

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Scoring failed: {0}")]
    Scoring(#[from] ScoreError),

    #[error("Persistence failed: {0}")]
    Persistence(StoreError),
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(v) => PipelineError::Validation(v),
            other => PipelineError::Persistence(other),
        }
    }
}

/// Global score as exposed on status endpoints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalStatus {
    pub global_score: f64,
    pub total_sessions: u64,
}

impl From<GlobalState> for GlobalStatus {
    fn from(state: GlobalState) -> Self {
        Self {
            global_score: state.score,
            total_sessions: state.sample_count,
        }
    }
}

/// Inputs echoed back with a session score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExplanation {
    pub logs: Vec<f64>,
    pub behavior: Vec<f64>,
    pub text: String,
    /// Scorer output before calibration
    pub raw_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_score: f64,
    pub global_ux_score: f64,
    pub total_sessions_analyzed: u64,
    pub alert_status: AlertStatus,
    pub explanation: SessionExplanation,
}

/// Scores UX sessions into the global UX score
pub struct SessionPipeline {
    scorer: SharedScorer<SessionInput>,
    state: Arc<DecayStateStore>,
    history: Arc<dyn HistoryLog<SessionRecord>>,
    scorer_timeout: Duration,
}

impl SessionPipeline {
    pub fn new(
        scorer: SharedScorer<SessionInput>,
        state: Arc<DecayStateStore>,
        history: Arc<dyn HistoryLog<SessionRecord>>,
    ) -> Self {
        Self {
            scorer,
            state,
            history,
            scorer_timeout: DEFAULT_SCORER_TIMEOUT,
        }
    }

    pub fn with_scorer_timeout(mut self, timeout: Duration) -> Self {
        self.scorer_timeout = timeout;
        self
    }

    pub fn history(&self) -> &Arc<dyn HistoryLog<SessionRecord>> {
        &self.history
    }

    pub fn status(&self) -> Result<GlobalStatus, StoreError> {
        Ok(self.state.get()?.into())
    }

    /// Score one session and fold it into the global score
    pub async fn process(&self, input: SessionInput) -> Result<SessionResponse, PipelineError> {
        input.validate()?;

        let raw_score = score_within(self.scorer.as_ref(), &input, self.scorer_timeout).await?;
        let session_score = calibrate_session_score(raw_score);
        self.state.rule().check_sample(session_score)?;

        let SessionInput {
            logs,
            behavior,
            review_text,
        } = input;

        self.history.append(SessionRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_score,
            raw_logs: logs.clone(),
            raw_behavior: behavior.clone(),
            review_text: review_text.clone(),
        })?;

        let outcome = self.state.update(session_score)?;
        let alert_status = AlertStatus::for_session(session_score);

        info!(
            "Session scored {:.2} (raw {:.3}), global {:.2} [{}]",
            session_score, raw_score, outcome.current.score, alert_status
        );

        Ok(SessionResponse {
            session_score,
            global_ux_score: outcome.current.score,
            total_sessions_analyzed: outcome.current.sample_count,
            alert_status,
            explanation: SessionExplanation {
                logs,
                behavior,
                text: review_text,
                raw_score,
            },
        })
    }
}

/// One delivered order awaiting analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub estimated_delivery_time: DateTime<Utc>,
    pub actual_delivery_time: DateTime<Utc>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub weather: Option<String>,
    #[serde(default)]
    pub restaurant_load: Option<String>,
    /// Reference passed to the packaging classifier
    pub image_filename: String,
}

impl OrderEvent {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.order_id.trim().is_empty() {
            return Err(ValidationError::Missing { field: "order_id" });
        }
        if self.image_filename.trim().is_empty() {
            return Err(ValidationError::Missing {
                field: "image_filename",
            });
        }
        if let Some(distance) = self.distance_km {
            if !distance.is_finite() || distance < 0.0 {
                return Err(ValidationError::Invalid {
                    field: "distance_km",
                    reason: format!("{} is not a distance", distance),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub lateness_min: f64,
    pub report: FusionReport,
    /// Global delivery score after this order, when a state is attached
    pub global_score: Option<f64>,
}

/// Fuses timeliness and packaging into one delivery score
pub struct OrderPipeline {
    classifier: SharedScorer<str, PackagingStatus>,
    history: Arc<dyn HistoryLog<OrderRecord>>,
    weights: FusionWeights,
    state: Option<Arc<DecayStateStore>>,
    scorer_timeout: Duration,
}

impl OrderPipeline {
    pub fn new(
        classifier: SharedScorer<str, PackagingStatus>,
        history: Arc<dyn HistoryLog<OrderRecord>>,
    ) -> Self {
        Self {
            classifier,
            history,
            weights: FusionWeights::default(),
            state: None,
            scorer_timeout: DEFAULT_SCORER_TIMEOUT,
        }
    }

    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Fold every fused score into `state` as well
    pub fn with_state(mut self, state: Arc<DecayStateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_scorer_timeout(mut self, timeout: Duration) -> Self {
        self.scorer_timeout = timeout;
        self
    }

    pub fn history(&self) -> &Arc<dyn HistoryLog<OrderRecord>> {
        &self.history
    }

    pub async fn process(&self, event: OrderEvent) -> Result<OrderResponse, PipelineError> {
        event.validate()?;

        let lateness_min = lateness_minutes(event.estimated_delivery_time, event.actual_delivery_time);

        let (packaging, packaging_label) =
            match score_within(self.classifier.as_ref(), event.image_filename.as_str(), self.scorer_timeout).await {
                Ok(status) => (status, None),
                Err(e) => {
                    warn!("Packaging check for order {} failed: {}", event.order_id, e);
                    (PackagingStatus::Damaged, Some("Error".to_string()))
                }
            };

        let report = assess(
            &OrderSignals {
                lateness_min,
                packaging,
                packaging_label,
                context: DeliveryContext {
                    weather: event.weather.clone(),
                    restaurant_load: event.restaurant_load.clone(),
                },
            },
            &self.weights,
        );

        if let Some(state) = &self.state {
            state.rule().check_sample(report.final_score)?;
        }

        let lateness_min = (lateness_min * 10.0).round() / 10.0;
        self.history.append(OrderRecord {
            timestamp: Utc::now(),
            order_id: event.order_id.clone(),
            final_score: report.final_score,
            status: report.summary.clone(),
            action_taken: report.action.label().to_string(),
            distance_km: event.distance_km,
            weather: event.weather,
            restaurant_load: event.restaurant_load,
            image_filename: event.image_filename,
            analysis_text: report.insight.analysis.clone(),
            recommendation: report.insight.recommendation.clone(),
            lateness_min,
        })?;

        let global_score = match &self.state {
            Some(state) => Some(state.update(report.final_score)?.current.score),
            None => None,
        };

        info!(
            "Order {} scored {:.2} ({}): {}",
            event.order_id,
            report.final_score,
            report.action.label(),
            report.summary
        );

        Ok(OrderResponse {
            order_id: event.order_id,
            lateness_min,
            report,
            global_score,
        })
    }
}
