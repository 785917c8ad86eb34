//! Decay state store
//!
//! Holds the one shared mutable resource of the core: the global score.
//! - `update` serializes read-modify-write behind a single mutex, so two
//!   concurrent callers can never both read the same old score
//! - `get` reads the backend snapshot without taking the update lock
//! - A sharp drop raises a decay alert as a log event and through an
//!   optional observer; it is never an error

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use pulse_core::{DecayAlert, DecayOutcome, DecayRule, GlobalState};

use crate::fs::{read_json, write_json_atomic};
use crate::StoreError;

/// Where the global state lives between updates
pub trait StateBackend: Send + Sync {
    /// Current snapshot, `None` before the first save
    fn load(&self) -> Result<Option<GlobalState>, StoreError>;

    fn save(&self, state: &GlobalState) -> Result<(), StoreError>;
}

/// Process-local state, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    state: Mutex<Option<GlobalState>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(state: GlobalState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }
}

impl StateBackend for MemoryStateBackend {
    fn load(&self) -> Result<Option<GlobalState>, StoreError> {
        Ok(*self.state.lock())
    }

    fn save(&self, state: &GlobalState) -> Result<(), StoreError> {
        *self.state.lock() = Some(*state);
        Ok(())
    }
}

/// JSON file replaced atomically on every save
#[derive(Debug, Clone)]
pub struct FileStateBackend {
    path: PathBuf,
}

impl FileStateBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateBackend for FileStateBackend {
    fn load(&self) -> Result<Option<GlobalState>, StoreError> {
        read_json(&self.path)
    }

    fn save(&self, state: &GlobalState) -> Result<(), StoreError> {
        write_json_atomic(&self.path, state)
    }
}

/// Callback invoked for every decay alert
pub type AlertObserver = Arc<dyn Fn(&DecayAlert) + Send + Sync>;

/// The global score with its exponential-moving-average update rule
pub struct DecayStateStore {
    backend: Box<dyn StateBackend>,
    rule: DecayRule,
    update_lock: Mutex<()>,
    observer: Option<AlertObserver>,
}

impl DecayStateStore {
    /// Open the store, creating the neutral default state on first use
    pub fn open(backend: Box<dyn StateBackend>, rule: DecayRule) -> Result<Self, StoreError> {
        rule.validate()?;

        if backend.load()?.is_none() {
            let initial = GlobalState {
                score: rule.domain.midpoint(),
                sample_count: 0,
            };
            backend.save(&initial)?;
            debug!("Initialized global state at {:.2}", initial.score);
        }

        Ok(Self {
            backend,
            rule,
            update_lock: Mutex::new(()),
            observer: None,
        })
    }

    /// In-memory store, mainly for tests and ephemeral runs
    pub fn in_memory(rule: DecayRule) -> Result<Self, StoreError> {
        Self::open(Box::new(MemoryStateBackend::new()), rule)
    }

    pub fn with_observer(mut self, observer: AlertObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn rule(&self) -> &DecayRule {
        &self.rule
    }

    pub fn get(&self) -> Result<GlobalState, StoreError> {
        self.backend
            .load()?
            .ok_or_else(|| StoreError::Unavailable("global state missing from backend".to_string()))
    }

    /// Fold one sample into the global score
    pub fn update(&self, sample: f64) -> Result<DecayOutcome, StoreError> {
        // reject before touching shared state
        self.rule.check_sample(sample)?;

        let outcome = {
            let _guard = self.update_lock.lock();
            let previous = self.get()?;
            let outcome = self.rule.apply(previous, sample)?;
            self.backend.save(&outcome.current)?;
            outcome
        };

        debug!(
            "Global score {:.3} -> {:.3} after {} samples",
            outcome.previous.score, outcome.current.score, outcome.current.sample_count
        );

        if let Some(alert) = &outcome.alert {
            warn!(
                target: "pulse::alert",
                previous_score = alert.previous_score,
                new_score = alert.new_score,
                delta = alert.delta,
                "Significant decline in global score (-{:.2})",
                alert.delta
            );
            if let Some(observer) = &self.observer {
                observer(alert);
            }
        }

        Ok(outcome)
    }
}
