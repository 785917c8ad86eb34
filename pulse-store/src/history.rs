//! Append-only history logs
//!
//! Records are never updated or deleted. Reads always come back newest
//! first, filtered by [`HistoryFilter`] and paginated by [`HistoryQuery`].

use parking_lot::{Mutex, RwLock};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::warn;

use pulse_core::{select, HistoryAggregate, HistoryFilter, HistoryQuery, Record};

use crate::StoreError;

/// Time-series store of immutable records
pub trait HistoryLog<R: Record>: Send + Sync {
    fn append(&self, record: R) -> Result<(), StoreError>;

    /// Every record in insertion order
    fn snapshot(&self) -> Result<Vec<R>, StoreError>;

    fn latest(&self) -> Result<Option<R>, StoreError> {
        Ok(self.tail(1)?.into_iter().next())
    }

    /// The most recent `n` records, newest first
    fn tail(&self, n: usize) -> Result<Vec<R>, StoreError> {
        let query = HistoryQuery {
            filter: HistoryFilter::default(),
            limit: n,
            offset: 0,
        };
        self.query(&query)
    }

    fn query(&self, query: &HistoryQuery) -> Result<Vec<R>, StoreError> {
        Ok(select(&self.snapshot()?, query))
    }

    fn aggregate(&self, filter: &HistoryFilter) -> Result<HistoryAggregate, StoreError> {
        let records = self.snapshot()?;
        Ok(HistoryAggregate::from_scores(
            records.iter().filter(|r| filter.matches(*r)).map(|r| r.score()),
        ))
    }
}

/// History kept in process memory
#[derive(Debug)]
pub struct MemoryHistory<R> {
    records: RwLock<Vec<R>>,
}

impl<R> Default for MemoryHistory<R> {
    fn default() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl<R> MemoryHistory<R> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: Record> HistoryLog<R> for MemoryHistory<R> {
    fn append(&self, record: R) -> Result<(), StoreError> {
        self.records.write().push(record);
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<R>, StoreError> {
        Ok(self.records.read().clone())
    }
}

/// History persisted as one JSON document per line
#[derive(Debug)]
pub struct JsonlHistory<R> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> R>,
}

impl<R> JsonlHistory<R> {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: Record> HistoryLog<R> for JsonlHistory<R> {
    fn append(&self, record: R) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock();
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<R>, StoreError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping unreadable line {} of {}: {}",
                    index + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(records)
    }
}
