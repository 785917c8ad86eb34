//! Pulse Store - Persistence behind the scoring core
//!
//! - [`DecayStateStore`]: the single shared `(score, sample_count)` pair,
//!   updated under one lock
//! - [`HistoryLog`]: append-only record log with filtered, paginated reads
//! - [`AggregateStore`]: the current rolling quality aggregate
//!
//! Every store has an in-memory backend and a file backend. File writes
//! replace the target atomically so readers never observe a torn snapshot.

pub mod aggregate;
pub mod error;
pub mod fs;
pub mod history;
pub mod state;

pub use aggregate::*;
pub use error::*;
pub use history::*;
pub use state::*;
