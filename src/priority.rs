use std::cmp::Ordering;

use rayon::prelude::*;
use serde::Serialize;

use crate::models::{
    CourseThresholds, PriorityScore, RankedStudent, RecencySource, StudentMetrics, StudentRecord,
    WarningFlag, WeightConfig,
};

/// Raw activity events per normalized activity point.
pub const ACTIVITY_BUCKET_SIZE: i64 = 10;

/// Width of the grace band around the posting-wait and on-hold thresholds.
pub const WARNING_BAND_DAYS: i64 = 7;

pub fn normalize_activity_count(raw: i64) -> i64 {
    raw.div_euclid(ACTIVITY_BUCKET_SIZE)
}

/// Weighted sum of the four metrics.
///
/// The completion term adds the weight instead of multiplying by it. Queue order
/// in existing deployments depends on that, so it is kept as is.
pub fn compute_score(metrics: StudentMetrics, weights: WeightConfig) -> PriorityScore {
    let activity_count_normalized = normalize_activity_count(metrics.activity_count_raw);
    let score = metrics.recency_days as f64 * weights.recency_weight
        + metrics.slot_count as f64 * weights.slot_weight
        + activity_count_normalized as f64 * weights.activity_weight
        + (metrics.lesson_completions as f64 + weights.completion_weight);

    PriorityScore {
        score,
        recency_days: metrics.recency_days,
        slot_count: metrics.slot_count,
        activity_count_normalized,
        completions: metrics.lesson_completions,
    }
}

struct WaitWindow {
    recency_days: i64,
    posting_wait_days: i64,
    on_hold_period_days: i64,
}

fn thresholds_unset(w: &WaitWindow) -> bool {
    w.posting_wait_days <= 0 || w.on_hold_period_days <= 0
}

fn past_posting_wait(w: &WaitWindow) -> bool {
    w.recency_days > w.posting_wait_days + WARNING_BAND_DAYS
        && w.recency_days < w.on_hold_period_days - WARNING_BAND_DAYS
}

fn near_on_hold(w: &WaitWindow) -> bool {
    w.recency_days >= w.on_hold_period_days - WARNING_BAND_DAYS
}

/// Evaluated top to bottom; the first matching rule decides the flag.
const WARNING_RULES: [(fn(&WaitWindow) -> bool, WarningFlag); 3] = [
    (thresholds_unset, WarningFlag::None),
    (past_posting_wait, WarningFlag::Overdue),
    (near_on_hold, WarningFlag::Late),
];

pub fn compute_warning(
    recency_days: i64,
    posting_wait_days: i64,
    on_hold_period_days: i64,
) -> WarningFlag {
    let window = WaitWindow {
        recency_days,
        posting_wait_days,
        on_hold_period_days,
    };

    WARNING_RULES
        .iter()
        .find(|(applies, _)| applies(&window))
        .map(|(_, flag)| *flag)
        .unwrap_or(WarningFlag::None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Score,
    Recency,
    Name,
}

/// Scores every student independently and returns the rows in `sort` order.
pub fn rank_students(
    inputs: Vec<(StudentRecord, RecencySource, StudentMetrics)>,
    weights: WeightConfig,
    thresholds: CourseThresholds,
    sort: SortKey,
) -> Vec<RankedStudent> {
    let mut ranked: Vec<RankedStudent> = inputs
        .into_par_iter()
        .map(|(student, source, metrics)| RankedStudent {
            student,
            source,
            priority: compute_score(metrics, weights),
            warning: compute_warning(
                metrics.recency_days,
                thresholds.posting_wait_days,
                thresholds.on_hold_period_days,
            ),
        })
        .collect();

    sort_queue(&mut ranked, sort);
    ranked
}

pub fn sort_queue(rows: &mut [RankedStudent], sort: SortKey) {
    rows.sort_by(|a, b| {
        let primary = match sort {
            SortKey::Score => b
                .priority
                .score
                .partial_cmp(&a.priority.score)
                .unwrap_or(Ordering::Equal),
            SortKey::Recency => b.priority.recency_days.cmp(&a.priority.recency_days),
            SortKey::Name => a.student.full_name.cmp(&b.student.full_name),
        };
        primary.then_with(|| a.student.student_id.cmp(&b.student.student_id))
    });
}
