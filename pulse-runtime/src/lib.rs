//! Pulse Runtime - Async services around the scoring core
//!
//! - [`Scorer`]: the seam to external models, with HTTP implementations
//! - [`StreamLog`]: append-only review stream with blocking reads
//! - [`StreamConsumer`]: scores the stream into a rolling quality window
//! - [`SessionPipeline`] / [`OrderPipeline`]: per-event scoring into history
//!   and decay state
//! - [`RiskMonitor`]: periodic churn risk evaluation over collected sources
//! - Dashboard read models for UX, delivery and food quality

pub mod consumer;
pub mod dashboard;
pub mod monitor;
pub mod pipeline;
pub mod scorer;
pub mod stream;

pub use consumer::*;
pub use dashboard::*;
pub use monitor::*;
pub use pipeline::*;
pub use scorer::*;
pub use stream::*;
