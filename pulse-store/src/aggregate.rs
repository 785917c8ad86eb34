//! Rolling aggregate persistence
//!
//! The stream consumer overwrites the current [`QualityAggregate`] after
//! each batch; dashboards read it without touching the consumer.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};

use pulse_core::QualityAggregate;

use crate::fs::{read_json, write_json_atomic};
use crate::StoreError;

/// Last-writer-wins slot for the current rolling aggregate
pub trait AggregateStore: Send + Sync {
    fn store(&self, aggregate: &QualityAggregate) -> Result<(), StoreError>;

    /// `None` until the first batch has been scored
    fn load(&self) -> Result<Option<QualityAggregate>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryAggregateStore {
    current: RwLock<Option<QualityAggregate>>,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateStore for MemoryAggregateStore {
    fn store(&self, aggregate: &QualityAggregate) -> Result<(), StoreError> {
        *self.current.write() = Some(aggregate.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<QualityAggregate>, StoreError> {
        Ok(self.current.read().clone())
    }
}

/// Aggregate kept in a JSON file, replaced atomically
#[derive(Debug, Clone)]
pub struct FileAggregateStore {
    path: PathBuf,
}

impl FileAggregateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl AggregateStore for FileAggregateStore {
    fn store(&self, aggregate: &QualityAggregate) -> Result<(), StoreError> {
        write_json_atomic(&self.path, aggregate)
    }

    fn load(&self) -> Result<Option<QualityAggregate>, StoreError> {
        read_json(&self.path)
    }
}
