//! Pulse Core - Domain model for signal aggregation and decay scoring
//!
//! This crate provides the foundational primitives:
//! - Upstream source definitions and per-source collection outcomes
//! - The decay-weighted global state and its update rule
//! - Fixed-capacity scoring windows with 8-level quality labels
//! - Pure score fusion (timeliness, packaging, action bands, insights)
//! - Session score calibration and input validation
//! - History record schemas and their query predicates

pub mod cursor;
pub mod error;
pub mod fusion;
pub mod history;
pub mod session;
pub mod source;
pub mod state;
pub mod window;

pub use cursor::*;
pub use error::*;
pub use fusion::*;
pub use history::*;
pub use session::*;
pub use source::*;
pub use state::*;
pub use window::*;

/// Default weight given to the newest sample in the global score
pub const DEFAULT_DECAY: f64 = 0.1;

/// Default drop (old - new) that raises a decay alert
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.5;

/// Neutral starting point of the global score
pub const NEUTRAL_SCORE: f64 = 5.0;

/// Lower bound of the global score domain
pub const MIN_SCORE: f64 = 0.0;

/// Upper bound of the global score domain
pub const MAX_SCORE: f64 = 10.0;

/// Default capacity of the review quality window
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;
