//! Pulse Collect
//!
//! Fan-out/fan-in over upstream dashboard read endpoints:
//! - Shared HTTP client construction
//! - One concurrent fetch per source, each with its own timeout
//! - Partial failures degrade to per-source error entries

pub mod client;
pub mod collector;

pub use client::*;
pub use collector::*;
