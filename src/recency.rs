//! Resolves how long a student has been waiting since their last training event.

use chrono::{DateTime, Utc};

use crate::error::{EngineError, EngineResult};
use crate::models::{RecencyAnchors, RecencyResolution, RecencySource};
use crate::provider::MetricsProvider;

type AnchorRule = fn(&RecencyAnchors, DateTime<Utc>) -> Option<(DateTime<Utc>, RecencySource)>;

/// Latest booking not flown yet: fall back to the one before it, if that one is past.
fn previous_booking(
    anchors: &RecencyAnchors,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, RecencySource)> {
    match anchors.bookings.as_slice() {
        [latest, previous, ..] if *latest > now && *previous <= now => {
            Some((*previous, RecencySource::Booking))
        }
        _ => None,
    }
}

fn latest_booking(
    anchors: &RecencyAnchors,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, RecencySource)> {
    anchors
        .bookings
        .first()
        .filter(|latest| **latest <= now)
        .map(|latest| (*latest, RecencySource::Booking))
}

fn last_grade(
    anchors: &RecencyAnchors,
    _now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, RecencySource)> {
    anchors.last_graded.map(|at| (at, RecencySource::Grade))
}

fn enrolment(
    anchors: &RecencyAnchors,
    _now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, RecencySource)> {
    anchors.enrolled_at.map(|at| (at, RecencySource::Enrol))
}

/// Evaluated top to bottom; the first rule yielding an anchor wins.
const ANCHOR_RULES: [AnchorRule; 4] = [previous_booking, latest_booking, last_grade, enrolment];

/// Whole days between `anchor` and `now`, truncated and never negative.
pub fn days_between(anchor: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - anchor).num_days().abs()
}

/// Returns `None` when the history holds no booking, grade or enrolment.
pub fn resolve_recency(anchors: &RecencyAnchors, now: DateTime<Utc>) -> Option<RecencyResolution> {
    ANCHOR_RULES
        .iter()
        .find_map(|rule| rule(anchors, now))
        .map(|(anchor, source)| RecencyResolution {
            days: days_between(anchor, now),
            source,
            anchor,
        })
}

pub async fn resolve_recency_days<P>(
    provider: &P,
    course_id: i64,
    student_id: i64,
    now: DateTime<Utc>,
) -> EngineResult<RecencyResolution>
where
    P: MetricsProvider + ?Sized,
{
    let anchors = provider.recency_anchors(course_id, student_id).await?;
    resolve_recency(&anchors, now)
        .ok_or_else(|| EngineError::missing(course_id, student_id, "recency anchor"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::InMemoryProvider;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn skips_future_booking_for_previous_past_one() {
        let anchors = RecencyAnchors {
            bookings: vec![now() + Duration::days(5), now() - Duration::days(3)],
            last_graded: Some(now() - Duration::days(30)),
            enrolled_at: Some(now() - Duration::days(90)),
        };
        let resolved = resolve_recency(&anchors, now()).unwrap();
        assert_eq!(resolved.source, RecencySource::Booking);
        assert_eq!(resolved.days, 3);
        assert_eq!(resolved.anchor, now() - Duration::days(3));
    }

    #[test]
    fn uses_latest_booking_when_already_flown() {
        let anchors = RecencyAnchors {
            bookings: vec![now() - Duration::days(2), now() - Duration::days(12)],
            last_graded: None,
            enrolled_at: Some(now() - Duration::days(90)),
        };
        let resolved = resolve_recency(&anchors, now()).unwrap();
        assert_eq!(resolved.source, RecencySource::Booking);
        assert_eq!(resolved.days, 2);
    }

    #[test]
    fn lone_future_booking_falls_back_to_grade() {
        let anchors = RecencyAnchors {
            bookings: vec![now() + Duration::days(1)],
            last_graded: Some(now() - Duration::days(8)),
            enrolled_at: Some(now() - Duration::days(90)),
        };
        let resolved = resolve_recency(&anchors, now()).unwrap();
        assert_eq!(resolved.source, RecencySource::Grade);
        assert_eq!(resolved.days, 8);
    }

    #[test]
    fn falls_back_to_enrolment() {
        let anchors = RecencyAnchors {
            bookings: vec![],
            last_graded: None,
            enrolled_at: Some(now() - Duration::days(21)),
        };
        let resolved = resolve_recency(&anchors, now()).unwrap();
        assert_eq!(resolved.source, RecencySource::Enrol);
        assert_eq!(resolved.days, 21);
    }

    #[test]
    fn truncates_partial_days() {
        let anchor = now() - Duration::days(4) - Duration::hours(23);
        assert_eq!(days_between(anchor, now()), 4);
        assert_eq!(days_between(now() - Duration::hours(5), now()), 0);
    }

    #[test]
    fn empty_history_is_unresolvable() {
        assert!(resolve_recency(&RecencyAnchors::default(), now()).is_none());
    }

    #[tokio::test]
    async fn provider_backed_resolution_reports_missing_history() {
        let provider = InMemoryProvider::default();
        let err = resolve_recency_days(&provider, 7, 42, now()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::MissingMetrics {
                course_id: 7,
                student_id: 42,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn provider_backed_resolution_uses_bookings() {
        let mut provider = InMemoryProvider::default();
        provider.enrol(7, 42, "Avery Lee", "avery@example.com", now() - Duration::days(60));
        provider.book(7, 42, now() - Duration::days(6));
        provider.book(7, 42, now() + Duration::days(2));

        let resolved = resolve_recency_days(&provider, 7, 42, now()).await.unwrap();
        assert_eq!(resolved.source, RecencySource::Booking);
        assert_eq!(resolved.days, 6);
    }
}
