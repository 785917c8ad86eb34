//! Decay-weighted global score
//!
//! The global score is an exponential moving average over per-event
//! samples:
//!
//! `new = sample * decay + old * (1 - decay)`
//!
//! This module holds the pure rule. Serializing concurrent updates and
//! persisting the result is the job of the state store.

use serde::{Deserialize, Serialize};

use crate::{ValidationError, DEFAULT_ALERT_THRESHOLD, DEFAULT_DECAY, MAX_SCORE, MIN_SCORE, NEUTRAL_SCORE};

/// The running global score and how many samples shaped it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    pub score: f64,
    pub sample_count: u64,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            score: NEUTRAL_SCORE,
            sample_count: 0,
        }
    }
}

/// Closed interval every sample and score must lie in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreDomain {
    pub min: f64,
    pub max: f64,
}

impl Default for ScoreDomain {
    fn default() -> Self {
        Self {
            min: MIN_SCORE,
            max: MAX_SCORE,
        }
    }
}

impl ScoreDomain {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Emitted when the global score drops sharply in one update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayAlert {
    pub previous_score: f64,
    pub new_score: f64,
    pub delta: f64,
}

/// Result of applying one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayOutcome {
    pub previous: GlobalState,
    pub current: GlobalState,
    pub alert: Option<DecayAlert>,
}

/// Exponential moving average parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayRule {
    /// Weight of the newest sample, in (0, 1]
    pub decay: f64,
    /// Drop that triggers a [`DecayAlert`]
    pub alert_threshold: f64,
    pub domain: ScoreDomain,
}

impl Default for DecayRule {
    fn default() -> Self {
        Self {
            decay: DEFAULT_DECAY,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            domain: ScoreDomain::default(),
        }
    }
}

impl DecayRule {
    pub fn new(decay: f64) -> Result<Self, ValidationError> {
        let rule = Self {
            decay,
            ..Default::default()
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn with_alert_threshold(mut self, threshold: f64) -> Self {
        self.alert_threshold = threshold;
        self
    }

    pub fn with_domain(mut self, domain: ScoreDomain) -> Self {
        self.domain = domain;
        self
    }

    /// Check the parameters themselves
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.decay > 0.0 && self.decay <= 1.0) {
            return Err(ValidationError::Invalid {
                field: "decay",
                reason: format!("{} is outside (0, 1]", self.decay),
            });
        }
        if !(self.domain.min < self.domain.max) {
            return Err(ValidationError::Invalid {
                field: "domain",
                reason: format!("[{}, {}] is empty", self.domain.min, self.domain.max),
            });
        }
        Ok(())
    }

    /// Check a sample before it is allowed near shared state
    pub fn check_sample(&self, sample: f64) -> Result<(), ValidationError> {
        if !sample.is_finite() {
            return Err(ValidationError::NonFinite { field: "sample" });
        }
        if !self.domain.contains(sample) {
            return Err(ValidationError::OutOfDomain {
                value: sample,
                min: self.domain.min,
                max: self.domain.max,
            });
        }
        Ok(())
    }

    /// Apply one sample to a state
    pub fn apply(&self, state: GlobalState, sample: f64) -> Result<DecayOutcome, ValidationError> {
        self.check_sample(sample)?;

        let score = (sample * self.decay + state.score * (1.0 - self.decay))
            .clamp(self.domain.min, self.domain.max);
        let current = GlobalState {
            score,
            sample_count: state.sample_count + 1,
        };

        let delta = state.score - score;
        let alert = (delta > self.alert_threshold).then_some(DecayAlert {
            previous_score: state.score,
            new_score: score,
            delta,
        });

        Ok(DecayOutcome {
            previous: state,
            current,
            alert,
        })
    }
}
