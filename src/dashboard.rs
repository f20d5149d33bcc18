//! Builds the instructor queue for one course.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{load_thresholds, load_weights};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    CourseThresholds, RankedStudent, RecencySource, StudentMetrics, StudentRecord, WeightConfig,
};
use crate::priority::{rank_students, SortKey};
use crate::provider::MetricsProvider;
use crate::recency::resolve_recency_days;

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueOptions {
    pub sort: SortKey,
    pub flagged_only: bool,
    pub limit: Option<usize>,
}

/// A ranked snapshot; valid only for the render it was built for.
#[derive(Debug, Clone, Serialize)]
pub struct InstructorQueue {
    pub course_id: i64,
    pub generated_at: DateTime<Utc>,
    pub weights: WeightConfig,
    pub thresholds: CourseThresholds,
    pub enrolled: usize,
    pub rows: Vec<RankedStudent>,
}

async fn require<F>(
    course_id: i64,
    student_id: i64,
    metric: &'static str,
    lookup: F,
) -> EngineResult<i64>
where
    F: std::future::Future<Output = EngineResult<Option<i64>>>,
{
    lookup
        .await?
        .ok_or_else(|| EngineError::missing(course_id, student_id, metric))
}

pub async fn fetch_metrics<P>(
    provider: &P,
    course_id: i64,
    student: StudentRecord,
    now: DateTime<Utc>,
) -> EngineResult<(StudentRecord, RecencySource, StudentMetrics)>
where
    P: MetricsProvider + ?Sized,
{
    let student_id = student.student_id;
    let recency = resolve_recency_days(provider, course_id, student_id, now).await?;
    let slot_count = require(
        course_id,
        student_id,
        "slot count",
        provider.slot_count(course_id, student_id, now),
    )
    .await?;
    let activity_count_raw = require(
        course_id,
        student_id,
        "activity count",
        provider.activity_count(course_id, student_id),
    )
    .await?;
    let lesson_completions = require(
        course_id,
        student_id,
        "lesson completions",
        provider.lesson_completions(course_id, student_id),
    )
    .await?;

    debug!(course_id, student_id, days = recency.days, source = ?recency.source, "fetched metrics");

    let metrics = StudentMetrics {
        student_id,
        recency_days: recency.days,
        slot_count,
        activity_count_raw,
        lesson_completions,
    };
    Ok((student, recency.source, metrics))
}

/// Any student with missing metrics fails the whole queue.
pub async fn build_queue<P>(
    provider: &P,
    course_id: i64,
    now: DateTime<Utc>,
    options: QueueOptions,
) -> EngineResult<InstructorQueue>
where
    P: MetricsProvider + ?Sized,
{
    let weights = load_weights(provider).await?;
    let thresholds = load_thresholds(provider, course_id).await?;
    let students = provider.enrolled_students(course_id).await?;
    let enrolled = students.len();

    let inputs = try_join_all(
        students
            .into_iter()
            .map(|student| fetch_metrics(provider, course_id, student, now)),
    )
    .await?;

    let mut rows = rank_students(inputs, weights, thresholds, options.sort);
    if options.flagged_only {
        rows.retain(|row| row.warning.is_flagged());
    }
    if let Some(limit) = options.limit {
        rows.truncate(limit);
    }

    info!(
        course_id,
        enrolled,
        shown = rows.len(),
        flagged = rows.iter().filter(|row| row.warning.is_flagged()).count(),
        "built instructor queue"
    );

    Ok(InstructorQueue {
        course_id,
        generated_at: now,
        weights,
        thresholds,
        enrolled,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ON_HOLD_PERIOD_SETTING, POSTING_WAIT_SETTING, SLOT_WEIGHT_SETTING};
    use crate::models::WarningFlag;
    use crate::provider::InMemoryProvider;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    fn course_with_three_students() -> InMemoryProvider {
        let mut provider = InMemoryProvider::default();
        provider.set_course_setting(1, POSTING_WAIT_SETTING, "10");
        provider.set_course_setting(1, ON_HOLD_PERIOD_SETTING, "40");
        provider.set_config(SLOT_WEIGHT_SETTING, "1");

        provider.enrol(1, 11, "Avery Lee", "avery@example.com", now() - Duration::days(100));
        provider.book(1, 11, now() - Duration::days(3));
        provider.book(1, 11, now() + Duration::days(4));

        provider.enrol(1, 12, "Jules Moreno", "jules@example.com", now() - Duration::days(100));
        provider.grade(1, 12, now() - Duration::days(20));
        provider.set_counts(1, 12, Some(2), Some(45), Some(3));

        provider.enrol(1, 13, "Kiara Patel", "kiara@example.com", now() - Duration::days(35));
        provider
    }

    #[tokio::test]
    async fn ranks_course_students_with_flags() {
        let provider = course_with_three_students();
        let queue = build_queue(&provider, 1, now(), QueueOptions::default())
            .await
            .unwrap();

        assert_eq!(queue.enrolled, 3);
        let ids: Vec<i64> = queue.rows.iter().map(|r| r.student.student_id).collect();
        assert_eq!(ids, vec![13, 12, 11]);

        let kiara = &queue.rows[0];
        assert_eq!(kiara.source, RecencySource::Enrol);
        assert_eq!(kiara.warning, WarningFlag::Late);

        let jules = &queue.rows[1];
        assert_eq!(jules.source, RecencySource::Grade);
        assert_eq!(jules.priority.activity_count_normalized, 4);
        assert_eq!(jules.warning, WarningFlag::Overdue);
        // 20*1 + 2*1 + 4*1 + (3 + 1)
        assert!((jules.priority.score - 30.0).abs() < 1e-9);

        assert_eq!(queue.rows[2].warning, WarningFlag::None);
    }

    #[tokio::test]
    async fn flagged_only_and_limit_trim_rows() {
        let provider = course_with_three_students();
        let options = QueueOptions {
            flagged_only: true,
            limit: Some(1),
            ..QueueOptions::default()
        };
        let queue = build_queue(&provider, 1, now(), options).await.unwrap();
        assert_eq!(queue.rows.len(), 1);
        assert_eq!(queue.rows[0].student.student_id, 13);
    }

    #[tokio::test]
    async fn missing_metric_fails_the_queue() {
        let mut provider = course_with_three_students();
        provider.set_counts(1, 11, Some(1), None, Some(0));

        let err = build_queue(&provider, 1, now(), QueueOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::MissingMetrics {
                student_id: 11,
                metric: "activity count",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn slots_count_against_the_queue_clock() {
        let mut provider = course_with_three_students();
        provider.post_slot(1, 11, now() - Duration::days(1));
        provider.post_slot(1, 11, now() + Duration::days(1));
        provider.post_slot(1, 11, now() + Duration::days(3));

        let slots_at = |queue: &InstructorQueue| {
            queue
                .rows
                .iter()
                .find(|row| row.student.student_id == 11)
                .map(|row| row.priority.slot_count)
        };

        let today = build_queue(&provider, 1, now(), QueueOptions::default())
            .await
            .unwrap();
        assert_eq!(slots_at(&today), Some(2));

        let later = build_queue(
            &provider,
            1,
            now() + Duration::days(2),
            QueueOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(slots_at(&later), Some(1));
    }

    #[tokio::test]
    async fn empty_course_yields_empty_queue() {
        let provider = InMemoryProvider::default();
        let queue = build_queue(&provider, 99, now(), QueueOptions::default())
            .await
            .unwrap();
        assert!(queue.rows.is_empty());
        assert_eq!(queue.thresholds, CourseThresholds::default());
    }
}
