//! The metrics store the engine reads from.
//!
//! `PgMetricsProvider` in `db` is the production implementation;
//! `InMemoryProvider` backs tests and local experiments.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::models::{RecencyAnchors, StudentRecord};

/// Enrolment states written by the lifecycle job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrolmentStatus {
    Active,
    OnHold,
    Suspended,
}

impl EnrolmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrolmentStatus::Active => "active",
            EnrolmentStatus::OnHold => "onhold",
            EnrolmentStatus::Suspended => "suspended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(EnrolmentStatus::Active),
            "onhold" => Some(EnrolmentStatus::OnHold),
            "suspended" => Some(EnrolmentStatus::Suspended),
            _ => None,
        }
    }
}

/// Keyed reads and writes over the training tables.
///
/// Count lookups return `None` when the store has no row for an enrolled
/// student, which callers treat as a data-integrity failure.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn enrolled_students(&self, course_id: i64) -> EngineResult<Vec<StudentRecord>>;

    async fn recency_anchors(&self, course_id: i64, student_id: i64)
        -> EngineResult<RecencyAnchors>;

    /// Availability slots that have not started as of `now`.
    async fn slot_count(
        &self,
        course_id: i64,
        student_id: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<i64>>;

    async fn activity_count(&self, course_id: i64, student_id: i64) -> EngineResult<Option<i64>>;

    async fn lesson_completions(&self, course_id: i64, student_id: i64)
        -> EngineResult<Option<i64>>;

    /// Raw plugin-wide setting, e.g. a weight.
    async fn config_value(&self, name: &str) -> EngineResult<Option<String>>;

    /// Raw course-level setting, e.g. a day threshold.
    async fn course_setting(&self, course_id: i64, name: &str) -> EngineResult<Option<String>>;

    async fn enrolment_status(&self, course_id: i64, student_id: i64)
        -> EngineResult<EnrolmentStatus>;

    async fn set_enrolment_status(
        &self,
        course_id: i64,
        student_id: i64,
        status: EnrolmentStatus,
    ) -> EngineResult<()>;
}

#[derive(Debug, Clone, Default)]
struct CourseStudent {
    record: Option<StudentRecord>,
    enrolled_at: Option<DateTime<Utc>>,
    bookings: Vec<DateTime<Utc>>,
    grades: Vec<DateTime<Utc>>,
    slot_starts: Vec<DateTime<Utc>>,
    slots: Option<i64>,
    activity: Option<i64>,
    lessons: Option<i64>,
}

#[derive(Debug, Default)]
pub struct InMemoryProvider {
    students: BTreeMap<(i64, i64), CourseStudent>,
    config: HashMap<String, String>,
    course_settings: HashMap<(i64, String), String>,
    statuses: Mutex<HashMap<(i64, i64), EnrolmentStatus>>,
}

impl InMemoryProvider {
    fn entry(&mut self, course_id: i64, student_id: i64) -> &mut CourseStudent {
        self.students.entry((course_id, student_id)).or_default()
    }

    /// Enrols a student with zeroed counters.
    pub fn enrol(
        &mut self,
        course_id: i64,
        student_id: i64,
        full_name: &str,
        email: &str,
        enrolled_at: DateTime<Utc>,
    ) {
        let entry = self.entry(course_id, student_id);
        entry.record = Some(StudentRecord {
            student_id,
            full_name: full_name.to_string(),
            email: email.to_string(),
        });
        entry.enrolled_at = Some(enrolled_at);
        entry.slots.get_or_insert(0);
        entry.activity.get_or_insert(0);
        entry.lessons.get_or_insert(0);
    }

    pub fn book(&mut self, course_id: i64, student_id: i64, session_at: DateTime<Utc>) {
        self.entry(course_id, student_id).bookings.push(session_at);
    }

    pub fn grade(&mut self, course_id: i64, student_id: i64, graded_at: DateTime<Utc>) {
        self.entry(course_id, student_id).grades.push(graded_at);
    }

    /// Posts an availability slot; counted on top of the `set_counts` slot base.
    pub fn post_slot(&mut self, course_id: i64, student_id: i64, starts_at: DateTime<Utc>) {
        self.entry(course_id, student_id).slot_starts.push(starts_at);
    }

    /// Overrides the counters; `None` simulates a missing row.
    pub fn set_counts(
        &mut self,
        course_id: i64,
        student_id: i64,
        slots: Option<i64>,
        activity: Option<i64>,
        lessons: Option<i64>,
    ) {
        let entry = self.entry(course_id, student_id);
        entry.slots = slots;
        entry.activity = activity;
        entry.lessons = lessons;
    }

    pub fn set_config(&mut self, name: &str, value: &str) {
        self.config.insert(name.to_string(), value.to_string());
    }

    pub fn set_course_setting(&mut self, course_id: i64, name: &str, value: &str) {
        self.course_settings
            .insert((course_id, name.to_string()), value.to_string());
    }

    fn student(&self, course_id: i64, student_id: i64) -> Option<&CourseStudent> {
        self.students.get(&(course_id, student_id))
    }
}

#[async_trait]
impl MetricsProvider for InMemoryProvider {
    async fn enrolled_students(&self, course_id: i64) -> EngineResult<Vec<StudentRecord>> {
        let statuses = self.statuses.lock().await;
        Ok(self
            .students
            .range((course_id, i64::MIN)..=(course_id, i64::MAX))
            .filter(|(key, _)| statuses.get(*key) != Some(&EnrolmentStatus::Suspended))
            .filter_map(|(_, student)| student.record.clone())
            .collect())
    }

    async fn recency_anchors(
        &self,
        course_id: i64,
        student_id: i64,
    ) -> EngineResult<RecencyAnchors> {
        let Some(student) = self.student(course_id, student_id) else {
            return Ok(RecencyAnchors::default());
        };

        let mut bookings = student.bookings.clone();
        bookings.sort_by(|a, b| b.cmp(a));
        bookings.truncate(2);

        Ok(RecencyAnchors {
            bookings,
            last_graded: student.grades.iter().max().copied(),
            enrolled_at: student.enrolled_at,
        })
    }

    async fn slot_count(
        &self,
        course_id: i64,
        student_id: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<i64>> {
        Ok(self.student(course_id, student_id).and_then(|s| {
            let upcoming = s.slot_starts.iter().filter(|at| **at >= now).count() as i64;
            s.slots.map(|base| base + upcoming)
        }))
    }

    async fn activity_count(&self, course_id: i64, student_id: i64) -> EngineResult<Option<i64>> {
        Ok(self.student(course_id, student_id).and_then(|s| s.activity))
    }

    async fn lesson_completions(
        &self,
        course_id: i64,
        student_id: i64,
    ) -> EngineResult<Option<i64>> {
        Ok(self.student(course_id, student_id).and_then(|s| s.lessons))
    }

    async fn config_value(&self, name: &str) -> EngineResult<Option<String>> {
        Ok(self.config.get(name).cloned())
    }

    async fn course_setting(&self, course_id: i64, name: &str) -> EngineResult<Option<String>> {
        Ok(self
            .course_settings
            .get(&(course_id, name.to_string()))
            .cloned())
    }

    async fn enrolment_status(
        &self,
        course_id: i64,
        student_id: i64,
    ) -> EngineResult<EnrolmentStatus> {
        if self.student(course_id, student_id).is_none() {
            return Err(EngineError::missing(course_id, student_id, "enrolment status"));
        }
        Ok(self
            .statuses
            .lock()
            .await
            .get(&(course_id, student_id))
            .copied()
            .unwrap_or(EnrolmentStatus::Active))
    }

    async fn set_enrolment_status(
        &self,
        course_id: i64,
        student_id: i64,
        status: EnrolmentStatus,
    ) -> EngineResult<()> {
        self.statuses
            .lock()
            .await
            .insert((course_id, student_id), status);
        Ok(())
    }
}
