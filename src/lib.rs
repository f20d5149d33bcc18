//! Ranks flight-training students for the instructor booking queue.
//!
//! Scores combine how long a student has waited since their last session with
//! their posted availability, course activity and completed lessons. Wait
//! warnings and the on-hold / suspension job share the same recency resolution.

pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod priority;
pub mod provider;
pub mod recency;
pub mod report;

pub use error::{EngineError, EngineResult};
pub use models::{PriorityScore, StudentMetrics, WarningFlag, WeightConfig};
pub use priority::{compute_score, compute_warning};
pub use recency::resolve_recency_days;
