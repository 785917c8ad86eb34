//! Dashboard summaries
//!
//! Read models built from history and the quality board. Their JSON shapes
//! are what the risk monitor decodes from upstream dashboards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pulse_core::{OrderRecord, QualityLabel, SessionOverview, SessionRecord};
use pulse_store::{HistoryLog, StoreError};

use crate::{GlobalStatus, QualitySnapshot, RecentReview};

/// Records behind the delivery trend chart
pub const DELIVERY_TREND_LEN: usize = 50;

/// Sessions behind the UX overview
pub const SESSION_OVERVIEW_LEN: usize = 20;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryKpis {
    pub orders_processed: usize,
    pub overall_avg_score: f64,
    pub critical_alerts: usize,
    /// `avg * 20 - critical * 2`
    pub holistic_index: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub final_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverySummary {
    pub kpis: DeliveryKpis,
    pub latest_order: OrderRecord,
    /// Oldest first
    pub trend_last_50: Vec<TrendPoint>,
}

impl DeliverySummary {
    /// Summarize order records held in insertion order; `None` without data
    pub fn from_records(records: &[OrderRecord]) -> Option<Self> {
        let mut sorted: Vec<&OrderRecord> = records.iter().collect();
        sorted.sort_by_key(|r| r.timestamp);
        let latest_order = (*sorted.last()?).clone();

        let scores: Vec<f64> = sorted.iter().map(|r| r.final_score).filter(|s| s.is_finite()).collect();
        let overall_avg = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };

        let critical_alerts = sorted
            .iter()
            .filter(|r| r.action_taken.contains("CRITICAL"))
            .count();

        let trend_last_50 = sorted
            .iter()
            .skip(sorted.len().saturating_sub(DELIVERY_TREND_LEN))
            .map(|r| TrendPoint {
                timestamp: r.timestamp,
                final_score: r.final_score,
            })
            .collect();

        Some(Self {
            kpis: DeliveryKpis {
                orders_processed: sorted.len(),
                overall_avg_score: round2(overall_avg),
                critical_alerts,
                holistic_index: round2(overall_avg * 20.0 - critical_alerts as f64 * 2.0),
            },
            latest_order,
            trend_last_50,
        })
    }

    pub fn load(history: &dyn HistoryLog<OrderRecord>) -> Result<Option<Self>, StoreError> {
        Ok(Self::from_records(&history.snapshot()?))
    }
}

/// UX dashboard payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UxSummary {
    pub overview: SessionOverview,
    pub latest: SessionRecord,
    pub global: GlobalStatus,
}

impl UxSummary {
    pub fn load(
        history: &dyn HistoryLog<SessionRecord>,
        global: GlobalStatus,
        window: usize,
    ) -> Result<Option<Self>, StoreError> {
        let recent = history.tail(window.max(1))?;
        let scores: Vec<f64> = recent.iter().map(|r| r.session_score).collect();

        let (overview, latest) = match (SessionOverview::from_scores(&scores), recent.into_iter().next()) {
            (Some(overview), Some(latest)) => (overview, latest),
            _ => return Ok(None),
        };

        Ok(Some(Self {
            overview,
            latest,
            global,
        }))
    }
}

/// Food quality dashboard payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodQualitySummary {
    /// Rolling mean in [0, 1]
    #[serde(rename = "holisticScore")]
    pub holistic_score: f64,
    #[serde(rename = "holisticLabel")]
    pub holistic_label: QualityLabel,
    #[serde(rename = "reviewCount")]
    pub review_count: usize,
    /// Newest first
    pub recent: Vec<RecentReview>,
}

impl FoodQualitySummary {
    pub fn from_snapshot(snapshot: QualitySnapshot) -> Option<Self> {
        let aggregate = snapshot.aggregate?;
        Some(Self {
            holistic_score: round2(aggregate.rolling_mean),
            holistic_label: aggregate.label,
            review_count: aggregate.window_len,
            recent: snapshot.recent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pulse_core::{QualityAggregate, StreamId};
    use pulse_store::MemoryHistory;

    fn order(minutes: i64, score: f64, action: &str) -> OrderRecord {
        OrderRecord {
            timestamp: DateTime::<Utc>::UNIX_EPOCH + Duration::minutes(minutes),
            order_id: format!("o-{}", minutes),
            final_score: score,
            status: String::new(),
            action_taken: action.to_string(),
            distance_km: None,
            weather: None,
            restaurant_load: None,
            image_filename: format!("{}.jpg", minutes),
            analysis_text: String::new(),
            recommendation: String::new(),
            lateness_min: 0.0,
        }
    }

    #[test]
    fn test_delivery_summary_kpis() {
        let records = vec![
            order(3, 2.4, "CRITICAL: Escalated"),
            order(1, 5.0, "No Action"),
            order(2, 3.8, "Flagged for Review"),
        ];

        let summary = DeliverySummary::from_records(&records).unwrap();
        assert_eq!(summary.kpis.orders_processed, 3);
        assert_eq!(summary.kpis.overall_avg_score, 3.73);
        assert_eq!(summary.kpis.critical_alerts, 1);
        // 3.7333 * 20 - 2
        assert_eq!(summary.kpis.holistic_index, 72.67);
        assert_eq!(summary.latest_order.order_id, "o-3");

        let trend: Vec<f64> = summary.trend_last_50.iter().map(|p| p.final_score).collect();
        assert_eq!(trend, vec![5.0, 3.8, 2.4]);
    }

    #[test]
    fn test_delivery_trend_is_capped() {
        let records: Vec<OrderRecord> = (0..80).map(|i| order(i, 4.0, "No Action")).collect();
        let summary = DeliverySummary::from_records(&records).unwrap();
        assert_eq!(summary.trend_last_50.len(), 50);
        assert_eq!(summary.trend_last_50[0].timestamp, records[30].timestamp);
        assert!(DeliverySummary::from_records(&[]).is_none());
    }

    #[test]
    fn test_ux_summary_from_history() {
        let history = MemoryHistory::<SessionRecord>::new();
        let global = GlobalStatus {
            global_score: 5.0,
            total_sessions: 0,
        };
        assert!(UxSummary::load(&history, global, 20).unwrap().is_none());

        for (i, score) in [8.0, 6.0, 4.0, 3.0, 2.0].iter().enumerate() {
            history
                .append(SessionRecord {
                    id: uuid::Uuid::new_v4(),
                    timestamp: DateTime::<Utc>::UNIX_EPOCH + Duration::minutes(i as i64),
                    session_score: *score,
                    raw_logs: vec![],
                    raw_behavior: vec![],
                    review_text: String::new(),
                })
                .unwrap();
        }

        let summary = UxSummary::load(&history, global, 20).unwrap().unwrap();
        assert_eq!(summary.overview.current_score, 2.0);
        assert_eq!(summary.overview.rolling_average, 4.6);
        assert!(summary.overview.declining);
        assert_eq!(summary.latest.session_score, 2.0);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["overview"]["rolling_average"], 4.6);
    }

    #[test]
    fn test_food_quality_summary_shape() {
        assert!(FoodQualitySummary::from_snapshot(QualitySnapshot::default()).is_none());

        let snapshot = QualitySnapshot {
            aggregate: Some(QualityAggregate {
                rolling_mean: 0.8125,
                label: QualityLabel::from_score(0.8125),
                window_len: 4,
                updated_at: DateTime::<Utc>::UNIX_EPOCH,
            }),
            recent: vec![RecentReview {
                id: StreamId::new(1, 0),
                text: "crispy".to_string(),
                score: 0.9,
                label: QualityLabel::Excellent,
            }],
        };

        let summary = FoodQualitySummary::from_snapshot(snapshot).unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["holisticScore"], 0.81);
        assert_eq!(json["reviewCount"], 4);
    }
}
