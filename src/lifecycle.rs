//! Scheduled on-hold and suspension checks.
//!
//! Each run resolves every enrolled student's recency and picks at most one
//! action per student from an ordered rule table. The stored enrolment status
//! gates the table: an on-hold student is only escalated or released, so the
//! on-hold notice goes out once per lapse.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::load_thresholds;
use crate::error::EngineResult;
use crate::models::CourseThresholds;
use crate::priority::WARNING_BAND_DAYS;
use crate::provider::{EnrolmentStatus, MetricsProvider};
use crate::recency::resolve_recency_days;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    OnHoldWarning,
    PlaceOnHold,
    Suspend,
    /// An on-hold student flew again; silently back to active.
    Reactivate,
}

impl LifecycleAction {
    /// Notification template, if the action notifies the student.
    pub fn template_key(self) -> Option<&'static str> {
        match self {
            LifecycleAction::OnHoldWarning => Some("onhold_warning"),
            LifecycleAction::PlaceOnHold => Some("onhold"),
            LifecycleAction::Suspend => Some("suspension"),
            LifecycleAction::Reactivate => None,
        }
    }

    /// Status recorded for the enrolment; warnings leave it untouched.
    pub fn status(self) -> Option<EnrolmentStatus> {
        match self {
            LifecycleAction::OnHoldWarning => None,
            LifecycleAction::PlaceOnHold => Some(EnrolmentStatus::OnHold),
            LifecycleAction::Suspend => Some(EnrolmentStatus::Suspended),
            LifecycleAction::Reactivate => Some(EnrolmentStatus::Active),
        }
    }

    fn threshold(self, thresholds: &CourseThresholds) -> i64 {
        match self {
            LifecycleAction::Suspend => thresholds.suspension_period_days,
            LifecycleAction::PlaceOnHold
            | LifecycleAction::OnHoldWarning
            | LifecycleAction::Reactivate => thresholds.on_hold_period_days,
        }
    }
}

fn past_suspension(days: i64, t: &CourseThresholds) -> bool {
    t.suspension_period_days > 0 && days >= t.suspension_period_days
}

fn past_on_hold(days: i64, t: &CourseThresholds) -> bool {
    t.on_hold_period_days > 0 && days >= t.on_hold_period_days
}

fn on_hold_warning_day(days: i64, t: &CourseThresholds) -> bool {
    t.on_hold_period_days > WARNING_BAND_DAYS && days == t.on_hold_period_days - WARNING_BAND_DAYS
}

/// Evaluated top to bottom; the first matching rule decides the action.
const LIFECYCLE_RULES: [(fn(i64, &CourseThresholds) -> bool, LifecycleAction); 3] = [
    (past_suspension, LifecycleAction::Suspend),
    (past_on_hold, LifecycleAction::PlaceOnHold),
    (on_hold_warning_day, LifecycleAction::OnHoldWarning),
];

pub fn evaluate_lifecycle(
    recency_days: i64,
    thresholds: &CourseThresholds,
) -> Option<LifecycleAction> {
    LIFECYCLE_RULES
        .iter()
        .find(|(applies, _)| applies(recency_days, thresholds))
        .map(|(_, action)| *action)
}

/// Action due for a student given the status the last run left behind.
///
/// Active students go through the full rule table. On-hold students can only
/// be suspended, stay put while still past the on-hold period, or be released
/// once their recency drops back below it. Suspended enrolments are final.
pub fn next_action(
    recency_days: i64,
    thresholds: &CourseThresholds,
    current: EnrolmentStatus,
) -> Option<LifecycleAction> {
    match current {
        EnrolmentStatus::Active => evaluate_lifecycle(recency_days, thresholds),
        EnrolmentStatus::OnHold if past_suspension(recency_days, thresholds) => {
            Some(LifecycleAction::Suspend)
        }
        EnrolmentStatus::OnHold if past_on_hold(recency_days, thresholds) => None,
        EnrolmentStatus::OnHold => Some(LifecycleAction::Reactivate),
        EnrolmentStatus::Suspended => None,
    }
}

/// Sends a templated message to a student.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, template_key: &str, data: &BTreeMap<String, String>) -> EngineResult<()>;
}

/// Emits notifications as log events instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, template_key: &str, data: &BTreeMap<String, String>) -> EngineResult<()> {
        info!(template = template_key, ?data, "notification");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleOutcome {
    pub student_id: i64,
    pub full_name: String,
    pub recency_days: i64,
    pub action: LifecycleAction,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LifecycleSummary {
    pub checked: usize,
    pub warned: usize,
    pub placed_on_hold: usize,
    pub suspended: usize,
    pub reactivated: usize,
    pub outcomes: Vec<LifecycleOutcome>,
}

pub async fn run_lifecycle_check<P, N>(
    provider: &P,
    notifier: &N,
    course_id: i64,
    now: DateTime<Utc>,
    dry_run: bool,
) -> EngineResult<LifecycleSummary>
where
    P: MetricsProvider + ?Sized,
    N: Notifier + ?Sized,
{
    let thresholds = load_thresholds(provider, course_id).await?;
    let students = provider.enrolled_students(course_id).await?;
    let mut summary = LifecycleSummary::default();

    for student in students {
        summary.checked += 1;
        let recency = resolve_recency_days(provider, course_id, student.student_id, now).await?;
        let current = provider
            .enrolment_status(course_id, student.student_id)
            .await?;
        let Some(action) = next_action(recency.days, &thresholds, current) else {
            continue;
        };

        debug!(
            course_id,
            student_id = student.student_id,
            days = recency.days,
            current = current.as_str(),
            ?action,
            "lifecycle action due"
        );

        let data = BTreeMap::from([
            ("fullname".to_string(), student.full_name.clone()),
            ("email".to_string(), student.email.clone()),
            ("courseid".to_string(), course_id.to_string()),
            ("days".to_string(), recency.days.to_string()),
            ("threshold".to_string(), action.threshold(&thresholds).to_string()),
        ]);

        if !dry_run {
            if let Some(template) = action.template_key() {
                notifier.send(template, &data).await?;
            }
            if let Some(status) = action.status() {
                provider
                    .set_enrolment_status(course_id, student.student_id, status)
                    .await?;
            }
        }

        match action {
            LifecycleAction::OnHoldWarning => summary.warned += 1,
            LifecycleAction::PlaceOnHold => summary.placed_on_hold += 1,
            LifecycleAction::Suspend => summary.suspended += 1,
            LifecycleAction::Reactivate => summary.reactivated += 1,
        }
        summary.outcomes.push(LifecycleOutcome {
            student_id: student.student_id,
            full_name: student.full_name,
            recency_days: recency.days,
            action,
        });
    }

    info!(
        course_id,
        checked = summary.checked,
        warned = summary.warned,
        on_hold = summary.placed_on_hold,
        suspended = summary.suspended,
        reactivated = summary.reactivated,
        dry_run,
        "lifecycle check finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ON_HOLD_PERIOD_SETTING, SUSPENSION_PERIOD_SETTING};
    use crate::provider::InMemoryProvider;
    use chrono::{Duration, TimeZone};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(
            &self,
            template_key: &str,
            data: &BTreeMap<String, String>,
        ) -> EngineResult<()> {
            self.sent
                .lock()
                .await
                .push((template_key.to_string(), data.clone()));
            Ok(())
        }
    }

    fn thresholds(on_hold: i64, suspension: i64) -> CourseThresholds {
        CourseThresholds {
            posting_wait_days: 10,
            on_hold_period_days: on_hold,
            suspension_period_days: suspension,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 6, 0, 0).unwrap()
    }

    #[test]
    fn rules_apply_in_order() {
        let t = thresholds(30, 60);
        assert_eq!(evaluate_lifecycle(10, &t), None);
        assert_eq!(evaluate_lifecycle(23, &t), Some(LifecycleAction::OnHoldWarning));
        assert_eq!(evaluate_lifecycle(24, &t), None);
        assert_eq!(evaluate_lifecycle(30, &t), Some(LifecycleAction::PlaceOnHold));
        assert_eq!(evaluate_lifecycle(60, &t), Some(LifecycleAction::Suspend));
        assert_eq!(evaluate_lifecycle(400, &t), Some(LifecycleAction::Suspend));
    }

    #[test]
    fn unset_thresholds_never_act() {
        let t = thresholds(0, 0);
        assert_eq!(evaluate_lifecycle(0, &t), None);
        assert_eq!(evaluate_lifecycle(1000, &t), None);
    }

    #[test]
    fn on_hold_students_only_escalate_or_release() {
        let t = thresholds(30, 60);
        let on_hold = EnrolmentStatus::OnHold;
        assert_eq!(next_action(23, &t, on_hold), Some(LifecycleAction::Reactivate));
        assert_eq!(next_action(30, &t, on_hold), None);
        assert_eq!(next_action(45, &t, on_hold), None);
        assert_eq!(next_action(60, &t, on_hold), Some(LifecycleAction::Suspend));
        assert_eq!(next_action(2, &t, on_hold), Some(LifecycleAction::Reactivate));

        assert_eq!(
            next_action(31, &t, EnrolmentStatus::Active),
            Some(LifecycleAction::PlaceOnHold)
        );
        assert_eq!(next_action(90, &t, EnrolmentStatus::Suspended), None);
    }

    #[tokio::test]
    async fn on_hold_notice_goes_out_once_across_daily_runs() {
        let mut provider = InMemoryProvider::default();
        provider.set_course_setting(4, ON_HOLD_PERIOD_SETTING, "30");
        provider.set_course_setting(4, SUSPENSION_PERIOD_SETTING, "60");
        provider.enrol(4, 2, "Jules Moreno", "jules@example.com", now() - Duration::days(31));

        let notifier = RecordingNotifier::default();
        for day in 0..3 {
            let at = now() + Duration::days(day);
            let summary = run_lifecycle_check(&provider, &notifier, 4, at, false)
                .await
                .unwrap();
            assert_eq!(summary.checked, 1);
            assert_eq!(summary.placed_on_hold, usize::from(day == 0));
        }

        let templates: Vec<String> = notifier
            .sent
            .lock()
            .await
            .iter()
            .map(|(key, _)| key.clone())
            .collect();
        assert_eq!(templates, vec!["onhold"]);
        assert_eq!(
            provider.enrolment_status(4, 2).await.unwrap(),
            EnrolmentStatus::OnHold
        );

        // day 60 since enrolment
        let at = now() + Duration::days(29);
        let summary = run_lifecycle_check(&provider, &notifier, 4, at, false)
            .await
            .unwrap();
        assert_eq!(summary.suspended, 1);
        assert_eq!(
            provider.enrolment_status(4, 2).await.unwrap(),
            EnrolmentStatus::Suspended
        );
        assert_eq!(notifier.sent.lock().await.len(), 2);

        let at = now() + Duration::days(30);
        let summary = run_lifecycle_check(&provider, &notifier, 4, at, false)
            .await
            .unwrap();
        assert_eq!(summary.checked, 0);
        assert_eq!(notifier.sent.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn new_session_releases_on_hold_student() {
        let mut provider = InMemoryProvider::default();
        provider.set_course_setting(4, ON_HOLD_PERIOD_SETTING, "30");
        provider.set_course_setting(4, SUSPENSION_PERIOD_SETTING, "60");
        provider.enrol(4, 2, "Jules Moreno", "jules@example.com", now() - Duration::days(31));

        let notifier = RecordingNotifier::default();
        run_lifecycle_check(&provider, &notifier, 4, now(), false)
            .await
            .unwrap();
        assert_eq!(
            provider.enrolment_status(4, 2).await.unwrap(),
            EnrolmentStatus::OnHold
        );

        provider.book(4, 2, now() + Duration::days(1));
        let summary = run_lifecycle_check(&provider, &notifier, 4, now() + Duration::days(2), false)
            .await
            .unwrap();

        assert_eq!(summary.reactivated, 1);
        assert_eq!(summary.outcomes[0].action, LifecycleAction::Reactivate);
        assert_eq!(
            provider.enrolment_status(4, 2).await.unwrap(),
            EnrolmentStatus::Active
        );
        assert_eq!(notifier.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn notifies_and_records_status() {
        let mut provider = InMemoryProvider::default();
        provider.set_course_setting(4, ON_HOLD_PERIOD_SETTING, "30");
        provider.set_course_setting(4, SUSPENSION_PERIOD_SETTING, "60");
        provider.enrol(4, 1, "Avery Lee", "avery@example.com", now() - Duration::days(23));
        provider.enrol(4, 2, "Jules Moreno", "jules@example.com", now() - Duration::days(31));
        provider.enrol(4, 3, "Kiara Patel", "kiara@example.com", now() - Duration::days(90));
        provider.enrol(4, 5, "Sam Ortiz", "sam@example.com", now() - Duration::days(90));
        provider.book(4, 5, now() - Duration::days(1));

        let notifier = RecordingNotifier::default();
        let summary = run_lifecycle_check(&provider, &notifier, 4, now(), false)
            .await
            .unwrap();

        assert_eq!(summary.checked, 4);
        assert_eq!(summary.warned, 1);
        assert_eq!(summary.placed_on_hold, 1);
        assert_eq!(summary.suspended, 1);

        let sent = notifier.sent.lock().await;
        let templates: Vec<&str> = sent.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(templates, vec!["onhold_warning", "onhold", "suspension"]);
        assert_eq!(sent[1].1["fullname"], "Jules Moreno");
        assert_eq!(sent[1].1["threshold"], "30");
        assert_eq!(sent[2].1["threshold"], "60");

        assert_eq!(provider.enrolment_status(4, 1).await.unwrap(), EnrolmentStatus::Active);
        assert_eq!(provider.enrolment_status(4, 2).await.unwrap(), EnrolmentStatus::OnHold);
        assert_eq!(provider.enrolment_status(4, 3).await.unwrap(), EnrolmentStatus::Suspended);
        assert_eq!(provider.enrolment_status(4, 5).await.unwrap(), EnrolmentStatus::Active);
    }

    #[tokio::test]
    async fn dry_run_sends_nothing() {
        let mut provider = InMemoryProvider::default();
        provider.set_course_setting(4, ON_HOLD_PERIOD_SETTING, "30");
        provider.enrol(4, 2, "Jules Moreno", "jules@example.com", now() - Duration::days(45));

        let notifier = RecordingNotifier::default();
        let summary = run_lifecycle_check(&provider, &notifier, 4, now(), true)
            .await
            .unwrap();

        assert_eq!(summary.placed_on_hold, 1);
        assert!(notifier.sent.lock().await.is_empty());
        assert_eq!(provider.enrolment_status(4, 2).await.unwrap(), EnrolmentStatus::Active);
    }
}
