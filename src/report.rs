use std::collections::HashMap;
use std::fmt::Write;

use crate::dashboard::InstructorQueue;
use crate::lifecycle::LifecycleSummary;
use crate::models::{RankedStudent, RecencySource, WarningFlag};

fn source_label(source: RecencySource) -> &'static str {
    match source {
        RecencySource::Booking => "last session",
        RecencySource::Grade => "last grade",
        RecencySource::Enrol => "enrolment",
    }
}

fn badge(flag: WarningFlag) -> String {
    match flag.badge() {
        Some(colour) => format!(" [{colour}: {flag:?}]").to_lowercase(),
        None => String::new(),
    }
}

pub fn queue_line(row: &RankedStudent) -> String {
    format!(
        "- {} ({}) score {:.2}: {} days since {}, {} slots, {} lessons{}",
        row.student.full_name,
        row.student.email,
        row.priority.score,
        row.priority.recency_days,
        source_label(row.source),
        row.priority.slot_count,
        row.priority.completions,
        badge(row.warning)
    )
}

pub fn count_by_flag(rows: &[RankedStudent]) -> HashMap<WarningFlag, usize> {
    let mut counts = HashMap::new();
    for row in rows {
        *counts.entry(row.warning).or_insert(0) += 1;
    }
    counts
}

pub fn build_report(queue: &InstructorQueue) -> String {
    let mut output = String::new();
    let counts = count_by_flag(&queue.rows);

    let _ = writeln!(output, "# Instructor Queue Report");
    let _ = writeln!(
        output,
        "Course {} as of {} ({} enrolled)",
        queue.course_id,
        queue.generated_at.format("%Y-%m-%d %H:%M UTC"),
        queue.enrolled
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Wait Status");

    if queue.thresholds.posting_wait_days <= 0 || queue.thresholds.on_hold_period_days <= 0 {
        let _ = writeln!(output, "Wait warnings are disabled for this course.");
    } else {
        let _ = writeln!(
            output,
            "Posting wait {} days, on-hold period {} days.",
            queue.thresholds.posting_wait_days, queue.thresholds.on_hold_period_days
        );
        for flag in [WarningFlag::Late, WarningFlag::Overdue, WarningFlag::None] {
            let _ = writeln!(
                output,
                "- {:?}: {} students",
                flag,
                counts.get(&flag).copied().unwrap_or(0)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Priority Queue");

    if queue.rows.is_empty() {
        let _ = writeln!(output, "No students to schedule.");
    } else {
        for row in &queue.rows {
            let _ = writeln!(output, "{}", queue_line(row));
        }
    }

    output
}

pub fn lifecycle_lines(summary: &LifecycleSummary) -> Vec<String> {
    summary
        .outcomes
        .iter()
        .map(|outcome| {
            format!(
                "- {} ({} days): {:?}",
                outcome.full_name, outcome.recency_days, outcome.action
            )
        })
        .collect()
}
