//! Score fusion for delivered orders
//!
//! Pure, deterministic functions. Identical inputs always produce
//! identical outputs:
//! - Timeliness staircase over lateness in minutes
//! - Packaging condition mapped to a two-valued sub-score
//! - Weighted fusion into one final score on a 1–5 scale
//! - Action banding, insight text and a recommendation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timeliness tiers, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimelinessTier {
    Excellent,
    Good,
    Average,
    Poor,
    VeryPoor,
}

impl TimelinessTier {
    /// Staircase over lateness: on time, ≤5, ≤15, ≤30, beyond
    pub fn from_lateness(lateness_min: f64) -> Self {
        if lateness_min <= 0.0 {
            TimelinessTier::Excellent
        } else if lateness_min <= 5.0 {
            TimelinessTier::Good
        } else if lateness_min <= 15.0 {
            TimelinessTier::Average
        } else if lateness_min <= 30.0 {
            TimelinessTier::Poor
        } else {
            TimelinessTier::VeryPoor
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            TimelinessTier::Excellent => 5.0,
            TimelinessTier::Good => 4.0,
            TimelinessTier::Average => 3.0,
            TimelinessTier::Poor => 2.0,
            TimelinessTier::VeryPoor => 1.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimelinessTier::Excellent => "Excellent",
            TimelinessTier::Good => "Good",
            TimelinessTier::Average => "Average",
            TimelinessTier::Poor => "Poor",
            TimelinessTier::VeryPoor => "Very Poor",
        }
    }

    /// Poor or worse counts as a significant delay
    pub fn is_delayed(&self) -> bool {
        matches!(self, TimelinessTier::Poor | TimelinessTier::VeryPoor)
    }
}

impl fmt::Display for TimelinessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Binary outcome of the packaging classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackagingStatus {
    Intact,
    Damaged,
}

impl PackagingStatus {
    pub fn score(&self) -> f64 {
        match self {
            PackagingStatus::Intact => 5.0,
            PackagingStatus::Damaged => 1.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PackagingStatus::Intact => "Excellent",
            PackagingStatus::Damaged => "Damaged",
        }
    }
}

/// Fixed fusion weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub timeliness: f64,
    pub packaging: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            timeliness: 0.7,
            packaging: 0.3,
        }
    }
}

impl FusionWeights {
    pub fn fuse(&self, timeliness_score: f64, packaging_score: f64) -> f64 {
        self.timeliness * timeliness_score + self.packaging * packaging_score
    }
}

/// What happens to an order after fusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionBand {
    NoAction,
    FlaggedForReview,
    CriticalEscalation,
}

impl ActionBand {
    /// `>= 4.0` no action, `>= 2.5` review, otherwise escalate
    pub fn from_score(final_score: f64) -> Self {
        if final_score >= 4.0 {
            ActionBand::NoAction
        } else if final_score >= 2.5 {
            ActionBand::FlaggedForReview
        } else {
            ActionBand::CriticalEscalation
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionBand::NoAction => "No Action",
            ActionBand::FlaggedForReview => "Flagged for Review",
            ActionBand::CriticalEscalation => "CRITICAL: Escalated",
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, ActionBand::CriticalEscalation)
    }
}

impl fmt::Display for ActionBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Circumstances around a delivery that explain, but do not change, the score
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryContext {
    pub weather: Option<String>,
    pub restaurant_load: Option<String>,
}

impl DeliveryContext {
    /// Rain and fog slow couriers down
    pub fn adverse_weather(&self) -> Option<&str> {
        self.weather
            .as_deref()
            .filter(|w| matches!(*w, "Rain" | "Fog"))
    }

    pub fn high_load(&self) -> bool {
        self.restaurant_load.as_deref() == Some("High")
    }
}

/// Human-readable explanation of a fused score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub analysis: String,
    pub recommendation: String,
}

/// Build the analysis text and recommendation for one order
pub fn insight(
    final_score: f64,
    timeliness: TimelinessTier,
    packaging_label: &str,
    context: &DeliveryContext,
) -> Insight {
    let damaged = packaging_label == PackagingStatus::Damaged.label();

    let mut reasons = Vec::new();
    if damaged {
        reasons.push("packaging damage".to_string());
    }
    if timeliness.is_delayed() {
        reasons.push("significant delay".to_string());
    }

    let mut circumstances = Vec::new();
    if let Some(weather) = context.adverse_weather() {
        circumstances.push(format!("adverse weather ({})", weather));
    }
    if context.high_load() {
        circumstances.push("high restaurant load".to_string());
    }

    let mut analysis = format!("Score: {:.1}/5.0. ", final_score);
    if !reasons.is_empty() {
        analysis.push_str(&format!("Impacted by {}. ", reasons.join(", ")));
    }
    if !circumstances.is_empty() {
        analysis.push_str(&format!("Context: {}.", circumstances.join(", ")));
    }

    let recommendation = if final_score < 4.0 && damaged {
        "Check Handling"
    } else if final_score < 4.0 && timeliness.is_delayed() {
        "Review Route / Adjust ETA"
    } else {
        "Standard Protocol"
    };

    Insight {
        analysis: analysis.trim_end().to_string(),
        recommendation: recommendation.to_string(),
    }
}

/// Minutes between the promised and actual delivery; negative when early
pub fn lateness_minutes(estimated: DateTime<Utc>, actual: DateTime<Utc>) -> f64 {
    (actual - estimated).num_milliseconds() as f64 / 60_000.0
}

/// Inputs to a full order assessment
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSignals {
    pub lateness_min: f64,
    pub packaging: PackagingStatus,
    /// Overrides the packaging label, e.g. "Error" when the classifier failed
    pub packaging_label: Option<String>,
    pub context: DeliveryContext,
}

/// Everything fusion derives from one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionReport {
    pub timeliness: TimelinessTier,
    pub timeliness_score: f64,
    pub packaging_score: f64,
    pub packaging_label: String,
    pub final_score: f64,
    pub summary: String,
    pub action: ActionBand,
    pub insight: Insight,
}

/// Run the whole fusion chain for one order
pub fn assess(signals: &OrderSignals, weights: &FusionWeights) -> FusionReport {
    let timeliness = TimelinessTier::from_lateness(signals.lateness_min);
    let packaging_label = signals
        .packaging_label
        .clone()
        .unwrap_or_else(|| signals.packaging.label().to_string());

    let final_score = weights.fuse(timeliness.score(), signals.packaging.score());
    let summary = format!(
        "Timeliness: {}, Packaging: {}",
        timeliness.label(),
        packaging_label
    );
    let action = ActionBand::from_score(final_score);
    let insight = insight(
        final_score,
        timeliness,
        &packaging_label,
        &signals.context,
    );

    FusionReport {
        timeliness,
        timeliness_score: timeliness.score(),
        packaging_score: signals.packaging.score(),
        packaging_label,
        final_score,
        summary,
        action,
        insight,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signals(lateness_min: f64, packaging: PackagingStatus) -> OrderSignals {
        OrderSignals {
            lateness_min,
            packaging,
            packaging_label: None,
            context: DeliveryContext::default(),
        }
    }

    #[test]
    fn test_timeliness_staircase() {
        let cases = [
            (-12.0, 5.0, "Excellent"),
            (0.0, 5.0, "Excellent"),
            (0.1, 4.0, "Good"),
            (5.0, 4.0, "Good"),
            (5.5, 3.0, "Average"),
            (15.0, 3.0, "Average"),
            (15.01, 2.0, "Poor"),
            (30.0, 2.0, "Poor"),
            (30.5, 1.0, "Very Poor"),
        ];
        for (lateness, score, label) in cases {
            let tier = TimelinessTier::from_lateness(lateness);
            assert_eq!(tier.score(), score, "lateness {}", lateness);
            assert_eq!(tier.label(), label, "lateness {}", lateness);
        }
    }

    #[test]
    fn test_on_time_intact_order() {
        let report = assess(&signals(0.0, PackagingStatus::Intact), &FusionWeights::default());
        assert!((report.final_score - 5.0).abs() < 1e-9);
        assert_eq!(report.timeliness.label(), "Excellent");
        assert_eq!(report.action, ActionBand::NoAction);
        assert_eq!(report.summary, "Timeliness: Excellent, Packaging: Excellent");
        assert_eq!(report.insight.recommendation, "Standard Protocol");
    }

    #[test]
    fn test_late_damaged_order_escalates() {
        let report = assess(&signals(10.0, PackagingStatus::Damaged), &FusionWeights::default());
        assert_eq!(report.timeliness_score, 3.0);
        assert_eq!(report.packaging_score, 1.0);
        assert!((report.final_score - 2.4).abs() < 1e-9);
        assert_eq!(report.action, ActionBand::CriticalEscalation);
        assert_eq!(report.insight.recommendation, "Check Handling");
    }

    #[test]
    fn test_action_band_edges() {
        assert_eq!(ActionBand::from_score(4.0), ActionBand::NoAction);
        assert_eq!(ActionBand::from_score(3.99), ActionBand::FlaggedForReview);
        assert_eq!(ActionBand::from_score(2.5), ActionBand::FlaggedForReview);
        assert_eq!(ActionBand::from_score(2.49), ActionBand::CriticalEscalation);
    }

    #[test]
    fn test_insight_text_with_context() {
        let context = DeliveryContext {
            weather: Some("Rain".to_string()),
            restaurant_load: Some("High".to_string()),
        };
        let insight = insight(1.6, TimelinessTier::VeryPoor, "Excellent", &context);
        assert_eq!(
            insight.analysis,
            "Score: 1.6/5.0. Impacted by significant delay. Context: adverse weather (Rain), high restaurant load."
        );
        assert_eq!(insight.recommendation, "Review Route / Adjust ETA");
    }

    #[test]
    fn test_insight_ignores_mild_context() {
        let context = DeliveryContext {
            weather: Some("Sunny".to_string()),
            restaurant_load: Some("Low".to_string()),
        };
        let insight = insight(5.0, TimelinessTier::Excellent, "Excellent", &context);
        assert_eq!(insight.analysis, "Score: 5.0/5.0.");
        assert_eq!(insight.recommendation, "Standard Protocol");
    }

    #[test]
    fn test_assess_is_deterministic() {
        let input = OrderSignals {
            lateness_min: 22.0,
            packaging: PackagingStatus::Damaged,
            packaging_label: Some("Error".to_string()),
            context: DeliveryContext {
                weather: Some("Fog".to_string()),
                restaurant_load: None,
            },
        };
        let a = assess(&input, &FusionWeights::default());
        let b = assess(&input, &FusionWeights::default());
        assert_eq!(a, b);
        assert_eq!(a.summary, "Timeliness: Poor, Packaging: Error");
        assert_eq!(
            a.insight.analysis,
            "Score: 1.7/5.0. Impacted by significant delay. Context: adverse weather (Fog)."
        );
        assert_eq!(a.insight.recommendation, "Review Route / Adjust ETA");
    }

    #[test]
    fn test_failed_classification_is_not_reported_as_damage() {
        let mut input = signals(0.0, PackagingStatus::Damaged);
        input.packaging_label = Some("Error".to_string());

        let report = assess(&input, &FusionWeights::default());
        assert_eq!(report.packaging_label, "Error");
        assert_eq!(report.packaging_score, 1.0);
        assert!(!report.insight.analysis.contains("packaging damage"));
        assert_ne!(report.insight.recommendation, "Check Handling");
    }

    #[test]
    fn test_lateness_minutes() {
        let estimated = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let actual = Utc.with_ymd_and_hms(2024, 5, 1, 12, 17, 30).unwrap();
        assert_eq!(lateness_minutes(estimated, actual), 17.5);
        assert_eq!(lateness_minutes(actual, estimated), -17.5);
    }
}
