//! Pulse configuration
//!
//! Loaded from an optional TOML file. Every section has defaults, so an
//! empty file (or none at all) yields a runnable in-memory setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use pulse_collect::CollectorConfig;
use pulse_core::{DecayRule, FusionWeights, ScoreDomain, SignalSource};
use pulse_runtime::{ConsumerConfig, MonitorConfig, ScorerEndpoint, DEFAULT_STREAM_MAX_LEN};

/// Where state, history and aggregates are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Lost on exit
    Memory,
    /// JSON files under `data_dir`
    #[default]
    File,
}

/// External model endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorersConfig {
    pub text: ScorerEndpoint,
    pub session: ScorerEndpoint,
    pub packaging: ScorerEndpoint,
    pub churn: ScorerEndpoint,
    pub timeout_ms: u64,
}

impl Default for ScorersConfig {
    fn default() -> Self {
        Self {
            text: ScorerEndpoint::new("http://127.0.0.1:8001/predict"),
            session: ScorerEndpoint::new("http://127.0.0.1:8002/predict"),
            packaging: ScorerEndpoint::new("http://127.0.0.1:8003/predict").with_response_field("label"),
            churn: ScorerEndpoint::new("http://127.0.0.1:8004/predict").with_response_field("churn"),
            timeout_ms: 10_000,
        }
    }
}

/// Decay rule used for the delivery score, whose domain is [0, 5]
pub fn delivery_decay_rule() -> DecayRule {
    DecayRule::default().with_domain(ScoreDomain { min: 0.0, max: 5.0 })
}

/// Fields missing from `[delivery_decay]` come from [`delivery_decay_rule`],
/// not from the generic [0, 10] rule
fn delivery_decay_overlay<'de, D>(deserializer: D) -> Result<DecayRule, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Overrides {
        decay: Option<f64>,
        alert_threshold: Option<f64>,
        domain: Option<ScoreDomain>,
    }

    let overrides = Overrides::deserialize(deserializer)?;
    let base = delivery_decay_rule();
    Ok(DecayRule {
        decay: overrides.decay.unwrap_or(base.decay),
        alert_threshold: overrides.alert_threshold.unwrap_or(base.alert_threshold),
        domain: overrides.domain.unwrap_or(base.domain),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub listen: String,
    pub data_dir: PathBuf,
    pub storage: StorageMode,
    pub collector: CollectorConfig,
    /// Dashboards fanned out to by `/api/data` and the risk monitor
    pub sources: Vec<SignalSource>,
    pub scorers: ScorersConfig,
    pub ux_decay: DecayRule,
    #[serde(deserialize_with = "delivery_decay_overlay")]
    pub delivery_decay: DecayRule,
    pub fusion: FusionWeights,
    pub consumer: ConsumerConfig,
    /// Entries the in-memory review stream retains
    pub stream_max_len: usize,
    pub monitor: MonitorConfig,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            data_dir: PathBuf::from("pulse-data"),
            storage: StorageMode::File,
            collector: CollectorConfig::default(),
            sources: vec![
                SignalSource::new("ux", "http://127.0.0.1:8080/ux-agent-latest"),
                SignalSource::new("delivery", "http://127.0.0.1:8080/orders/summary"),
                SignalSource::new("food", "http://127.0.0.1:8080/quality"),
            ],
            scorers: ScorersConfig::default(),
            ux_decay: DecayRule::default(),
            delivery_decay: delivery_decay_rule(),
            fusion: FusionWeights::default(),
            consumer: ConsumerConfig::default(),
            stream_max_len: DEFAULT_STREAM_MAX_LEN,
            monitor: MonitorConfig::default(),
        }
    }
}

impl PulseConfig {
    /// Load `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.ux_decay.validate().context("ux_decay")?;
        self.delivery_decay.validate().context("delivery_decay")?;
        let domain = self.delivery_decay.domain;
        if !domain.contains(1.0) || !domain.contains(5.0) {
            anyhow::bail!(
                "delivery_decay.domain [{}, {}] must cover fused scores in [1, 5]",
                domain.min,
                domain.max
            );
        }
        if self.consumer.batch_size == 0 {
            anyhow::bail!("consumer.batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
