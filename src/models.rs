use chrono::{DateTime, Utc};
use serde::Serialize;

/// Raw per-student inputs to the priority score, fetched fresh for each queue build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StudentMetrics {
    pub student_id: i64,
    pub recency_days: i64,
    pub slot_count: i64,
    pub activity_count_raw: i64,
    pub lesson_completions: i64,
}

/// Multipliers applied to each metric. Loaded once per request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightConfig {
    pub recency_weight: f64,
    pub slot_weight: f64,
    pub activity_weight: f64,
    pub completion_weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriorityScore {
    pub score: f64,
    pub recency_days: i64,
    pub slot_count: i64,
    pub activity_count_normalized: i64,
    pub completions: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningFlag {
    None,
    Overdue,
    Late,
}

impl WarningFlag {
    /// Dashboard badge colour, if the flag warrants one.
    pub fn badge(self) -> Option<&'static str> {
        match self {
            WarningFlag::None => None,
            WarningFlag::Overdue => Some("amber"),
            WarningFlag::Late => Some("red"),
        }
    }

    pub fn is_flagged(self) -> bool {
        self != WarningFlag::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecencySource {
    Booking,
    Grade,
    Enrol,
}

/// History a student's recency is resolved from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecencyAnchors {
    /// Up to two most recent booked sessions, newest first.
    pub bookings: Vec<DateTime<Utc>>,
    pub last_graded: Option<DateTime<Utc>>,
    pub enrolled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecencyResolution {
    pub days: i64,
    pub source: RecencySource,
    pub anchor: DateTime<Utc>,
}

/// Course-level day thresholds. Zero disables the associated check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CourseThresholds {
    pub posting_wait_days: i64,
    pub on_hold_period_days: i64,
    pub suspension_period_days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentRecord {
    pub student_id: i64,
    pub full_name: String,
    pub email: String,
}

/// One row of the instructor queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedStudent {
    pub student: StudentRecord,
    pub source: RecencySource,
    pub priority: PriorityScore,
    pub warning: WarningFlag,
}
