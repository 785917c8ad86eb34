//! UX session scoring
//!
//! A session carries fixed-length telemetry vectors plus review text.
//! The external model's raw output is calibrated away from the neutral
//! middle before it feeds the global score.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ValidationError, MAX_SCORE, MIN_SCORE};

/// Number of log-derived features per session
pub const LOG_FEATURES: usize = 10;

/// Number of behavioural features per session
pub const BEHAVIOR_FEATURES: usize = 5;

/// Session scores below this are critical
pub const CRITICAL_SESSION_SCORE: f64 = 4.0;

/// Rolling averages below this mark the whole system critical
pub const CRITICAL_ROLLING_AVERAGE: f64 = 4.5;

/// Raw inputs for one UX session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInput {
    pub logs: Vec<f64>,
    pub behavior: Vec<f64>,
    pub review_text: String,
}

impl SessionInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_vector("logs", &self.logs, LOG_FEATURES)?;
        check_vector("behavior", &self.behavior, BEHAVIOR_FEATURES)?;
        if self.review_text.trim().is_empty() {
            return Err(ValidationError::Missing {
                field: "review_text",
            });
        }
        Ok(())
    }
}

fn check_vector(field: &'static str, values: &[f64], expected: usize) -> Result<(), ValidationError> {
    if values.len() != expected {
        return Err(ValidationError::WrongLength {
            field,
            expected,
            actual: values.len(),
        });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ValidationError::NonFinite { field });
    }
    Ok(())
}

/// Push raw model output away from the neutral band and clip to [0, 10]
pub fn calibrate_session_score(raw: f64) -> f64 {
    let amplified = if raw > 5.5 {
        raw + (raw - 5.0) * 0.8
    } else if raw < 4.5 {
        raw - (5.0 - raw) * 1.2
    } else {
        raw
    };
    amplified.clamp(MIN_SCORE, MAX_SCORE)
}

/// Health flag attached to scored sessions and overviews
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Critical,
    Healthy,
}

impl AlertStatus {
    pub fn for_session(score: f64) -> Self {
        if score < CRITICAL_SESSION_SCORE {
            AlertStatus::Critical
        } else {
            AlertStatus::Healthy
        }
    }

    pub fn for_rolling_average(average: f64) -> Self {
        if average < CRITICAL_ROLLING_AVERAGE {
            AlertStatus::Critical
        } else {
            AlertStatus::Healthy
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Critical => f.write_str("CRITICAL"),
            AlertStatus::Healthy => f.write_str("HEALTHY"),
        }
    }
}

/// Rolling view over recent session scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOverview {
    pub current_score: f64,
    pub rolling_average: f64,
    /// Rolling average minus the average of the older half
    pub delta: Option<f64>,
    pub status: AlertStatus,
    /// The five most recent scores fall strictly over time
    pub declining: bool,
    pub sessions: usize,
}

impl SessionOverview {
    /// Build from scores ordered newest first
    pub fn from_scores(newest_first: &[f64]) -> Option<Self> {
        let current_score = *newest_first.first()?;
        let rolling_average = mean(newest_first);

        let older_half = &newest_first[newest_first.len() - newest_first.len() / 2..];
        let delta = (!older_half.is_empty()).then(|| rolling_average - mean(older_half));

        let declining = newest_first.len() >= 5
            && newest_first[..5].windows(2).all(|pair| pair[0] < pair[1]);

        Some(Self {
            current_score,
            rolling_average,
            delta,
            status: AlertStatus::for_rolling_average(rolling_average),
            declining,
            sessions: newest_first.len(),
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
