//! Error types for the priority engine and its metrics store.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The metrics store could not supply a metric for an enrolled student.
    #[error("missing {metric} for student {student_id} in course {course_id}")]
    MissingMetrics {
        course_id: i64,
        student_id: i64,
        metric: &'static str,
    },
    /// A weight or threshold setting holds a value that is not a finite number.
    #[error("invalid setting '{name}' = '{value}': {reason}")]
    Configuration {
        name: String,
        value: String,
        reason: String,
    },
    #[error("metrics store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl EngineError {
    pub fn missing(course_id: i64, student_id: i64, metric: &'static str) -> Self {
        Self::MissingMetrics {
            course_id,
            student_id,
            metric,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
