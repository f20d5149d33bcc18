use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{
    Settings, ON_HOLD_PERIOD_SETTING, POSTING_WAIT_SETTING, SUSPENSION_PERIOD_SETTING,
};
use crate::error::{EngineError, EngineResult};
use crate::models::{RecencyAnchors, StudentRecord};
use crate::provider::{EnrolmentStatus, MetricsProvider};

pub async fn connect(settings: &Settings) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Enrol,
    Booking,
    Grade,
    Slot,
    Activity,
    Lesson,
}

impl EventKind {
    /// Table and timestamp column for keyed event rows; enrolments are stored apart.
    fn target(self) -> Option<(&'static str, &'static str)> {
        match self {
            EventKind::Enrol => None,
            EventKind::Booking => Some(("bookings", "session_at")),
            EventKind::Grade => Some(("grades", "graded_at")),
            EventKind::Slot => Some(("availability_slots", "starts_at")),
            EventKind::Activity => Some(("activity_log", "occurred_at")),
            EventKind::Lesson => Some(("lesson_completions", "completed_at")),
        }
    }
}

/// One training event as imported from CSV or seeded.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingEvent {
    pub full_name: String,
    pub email: String,
    pub course_id: i64,
    pub event_type: EventKind,
    pub occurred_at: DateTime<Utc>,
    pub lesson_id: Option<String>,
    pub source_key: Option<String>,
}

async fn upsert_student(pool: &PgPool, full_name: &str, email: &str) -> anyhow::Result<i64> {
    let student_id: i64 = sqlx::query(
        r#"
        INSERT INTO flight_training.students (full_name, email)
        VALUES ($1, $2)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(full_name)
    .bind(email)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(student_id)
}

async fn ensure_course(pool: &PgPool, course_id: i64) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO flight_training.courses (id) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(course_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Returns whether a new row was written.
pub async fn insert_event(pool: &PgPool, event: &TrainingEvent) -> anyhow::Result<bool> {
    ensure_course(pool, event.course_id).await?;
    let student_id = upsert_student(pool, &event.full_name, &event.email).await?;

    let Some((table, column)) = event.event_type.target() else {
        let result = sqlx::query(
            r#"
            INSERT INTO flight_training.enrolments (course_id, student_id, enrolled_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (course_id, student_id) DO NOTHING
            "#,
        )
        .bind(event.course_id)
        .bind(student_id)
        .bind(event.occurred_at)
        .execute(pool)
        .await?;
        return Ok(result.rows_affected() > 0);
    };

    let source_key = event
        .source_key
        .clone()
        .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

    let outcome = if event.event_type == EventKind::Lesson {
        let lesson_id = event
            .lesson_id
            .as_deref()
            .with_context(|| format!("lesson event {source_key} has no lesson_id"))?;
        sqlx::query(
            r#"
            INSERT INTO flight_training.lesson_completions
            (id, course_id, student_id, lesson_id, completed_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.course_id)
        .bind(student_id)
        .bind(lesson_id)
        .bind(event.occurred_at)
        .bind(&source_key)
        .execute(pool)
        .await
    } else {
        let query = format!(
            "INSERT INTO flight_training.{table} (id, course_id, student_id, {column}, source_key) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (source_key) DO NOTHING"
        );
        sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(event.course_id)
            .bind(student_id)
            .bind(event.occurred_at)
            .bind(&source_key)
            .execute(pool)
            .await
    };
    let result = outcome.with_context(|| {
        format!(
            "failed to store {:?} event {source_key}; is {} enrolled in course {}?",
            event.event_type, event.email, event.course_id
        )
    })?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_config(
    pool: &PgPool,
    course_id: Option<i64>,
    name: &str,
    value: &str,
) -> anyhow::Result<()> {
    match course_id {
        Some(course_id) => {
            ensure_course(pool, course_id).await?;
            sqlx::query(
                r#"
                INSERT INTO flight_training.course_settings (course_id, name, value)
                VALUES ($1, $2, $3)
                ON CONFLICT (course_id, name) DO UPDATE SET value = EXCLUDED.value
                "#,
            )
            .bind(course_id)
            .bind(name)
            .bind(value)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO flight_training.plugin_config (name, value)
                VALUES ($1, $2)
                ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value
                "#,
            )
            .bind(name)
            .bind(value)
            .execute(pool)
            .await?;
        }
    }
    debug!(?course_id, name, value, "setting stored");
    Ok(())
}

pub const SEED_COURSE_ID: i64 = 101;

fn seed_events(now: DateTime<Utc>) -> Vec<TrainingEvent> {
    let students = [
        ("Avery Lee", "avery.lee@example.com"),
        ("Jules Moreno", "jules.moreno@example.com"),
        ("Kiara Patel", "kiara.patel@example.com"),
    ];
    let rows: [(usize, EventKind, i64, Option<&str>); 14] = [
        (0, EventKind::Enrol, -120, None),
        (0, EventKind::Booking, -4, None),
        (0, EventKind::Booking, 3, None),
        (0, EventKind::Grade, -4, None),
        (0, EventKind::Slot, 2, None),
        (0, EventKind::Slot, 5, None),
        (0, EventKind::Lesson, -30, Some("circuits-1")),
        (1, EventKind::Enrol, -90, None),
        (1, EventKind::Grade, -22, None),
        (1, EventKind::Slot, 1, None),
        (1, EventKind::Activity, -2, None),
        (1, EventKind::Lesson, -25, Some("circuits-1")),
        (2, EventKind::Enrol, -36, None),
        (2, EventKind::Activity, -10, None),
    ];

    rows.iter()
        .enumerate()
        .map(|(index, (student, kind, offset_days, lesson))| {
            let (full_name, email) = students[*student];
            TrainingEvent {
                full_name: full_name.to_string(),
                email: email.to_string(),
                course_id: SEED_COURSE_ID,
                event_type: *kind,
                occurred_at: now + Duration::days(*offset_days),
                lesson_id: lesson.map(str::to_string),
                source_key: Some(format!("seed-{:03}", index + 1)),
            }
        })
        .collect()
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    ensure_course(pool, SEED_COURSE_ID).await?;
    for (name, value) in [
        (POSTING_WAIT_SETTING, "10"),
        (ON_HOLD_PERIOD_SETTING, "40"),
        (SUSPENSION_PERIOD_SETTING, "90"),
    ] {
        set_config(pool, Some(SEED_COURSE_ID), name, value).await?;
    }

    let mut inserted = 0usize;
    for event in seed_events(Utc::now()) {
        if insert_event(pool, &event).await? {
            inserted += 1;
        }
    }
    info!(course_id = SEED_COURSE_ID, inserted, "seed data loaded");
    Ok(())
}

pub fn read_events<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<TrainingEvent>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut events = Vec::new();
    for (line, result) in reader.deserialize::<TrainingEvent>().enumerate() {
        events.push(result.with_context(|| format!("invalid event on data row {}", line + 1))?);
    }
    Ok(events)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("cannot open {}", csv_path.display()))?;
    let events = read_events(file)?;
    let mut inserted = 0usize;

    for event in &events {
        if insert_event(pool, event).await? {
            inserted += 1;
        }
    }

    info!(read = events.len(), inserted, "import finished");
    Ok(inserted)
}

/// Production metrics store over the `flight_training` schema.
#[derive(Debug, Clone)]
pub struct PgMetricsProvider {
    pool: PgPool,
}

impl PgMetricsProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs `count_sql` as a scalar subquery scoped to one enrolment; `None` if not enrolled.
    /// `at` is bound as `$3` when given.
    async fn enrolled_count(
        &self,
        count_sql: &str,
        course_id: i64,
        student_id: i64,
        at: Option<DateTime<Utc>>,
    ) -> EngineResult<Option<i64>> {
        let query = format!(
            "SELECT ({count_sql}) AS total \
             FROM flight_training.enrolments e \
             WHERE e.course_id = $1 AND e.student_id = $2"
        );
        let mut lookup = sqlx::query_scalar::<_, i64>(&query)
            .bind(course_id)
            .bind(student_id);
        if let Some(at) = at {
            lookup = lookup.bind(at);
        }
        let total = lookup.fetch_optional(&self.pool).await?;
        Ok(total)
    }
}

#[async_trait]
impl MetricsProvider for PgMetricsProvider {
    async fn enrolled_students(&self, course_id: i64) -> EngineResult<Vec<StudentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.full_name, s.email
            FROM flight_training.enrolments e
            JOIN flight_training.students s ON s.id = e.student_id
            WHERE e.course_id = $1 AND e.status <> 'suspended'
            ORDER BY s.id
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StudentRecord {
                student_id: row.get("id"),
                full_name: row.get("full_name"),
                email: row.get("email"),
            })
            .collect())
    }

    async fn recency_anchors(
        &self,
        course_id: i64,
        student_id: i64,
    ) -> EngineResult<RecencyAnchors> {
        let bookings = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            SELECT session_at FROM flight_training.bookings
            WHERE course_id = $1 AND student_id = $2
            ORDER BY session_at DESC
            LIMIT 2
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        let last_graded = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(graded_at) FROM flight_training.grades
            WHERE course_id = $1 AND student_id = $2
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;

        let enrolled_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            SELECT enrolled_at FROM flight_training.enrolments
            WHERE course_id = $1 AND student_id = $2
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(RecencyAnchors {
            bookings,
            last_graded,
            enrolled_at,
        })
    }

    async fn slot_count(
        &self,
        course_id: i64,
        student_id: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<i64>> {
        self.enrolled_count(
            "SELECT COUNT(*) FROM flight_training.availability_slots a \
             WHERE a.course_id = e.course_id AND a.student_id = e.student_id \
             AND a.starts_at >= $3",
            course_id,
            student_id,
            Some(now),
        )
        .await
    }

    async fn activity_count(&self, course_id: i64, student_id: i64) -> EngineResult<Option<i64>> {
        self.enrolled_count(
            "SELECT COUNT(*) FROM flight_training.activity_log l \
             WHERE l.course_id = e.course_id AND l.student_id = e.student_id",
            course_id,
            student_id,
            None,
        )
        .await
    }

    async fn lesson_completions(
        &self,
        course_id: i64,
        student_id: i64,
    ) -> EngineResult<Option<i64>> {
        self.enrolled_count(
            "SELECT COUNT(DISTINCT c.lesson_id) FROM flight_training.lesson_completions c \
             WHERE c.course_id = e.course_id AND c.student_id = e.student_id",
            course_id,
            student_id,
            None,
        )
        .await
    }

    async fn config_value(&self, name: &str) -> EngineResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM flight_training.plugin_config WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn course_setting(&self, course_id: i64, name: &str) -> EngineResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM flight_training.course_settings WHERE course_id = $1 AND name = $2",
        )
        .bind(course_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn enrolment_status(
        &self,
        course_id: i64,
        student_id: i64,
    ) -> EngineResult<EnrolmentStatus> {
        let status = sqlx::query_scalar::<_, String>(
            r#"
            SELECT status FROM flight_training.enrolments
            WHERE course_id = $1 AND student_id = $2
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        status
            .as_deref()
            .and_then(EnrolmentStatus::parse)
            .ok_or_else(|| EngineError::missing(course_id, student_id, "enrolment status"))
    }

    async fn set_enrolment_status(
        &self,
        course_id: i64,
        student_id: i64,
        status: EnrolmentStatus,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE flight_training.enrolments SET status = $3
            WHERE course_id = $1 AND student_id = $2
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        debug!(course_id, student_id, status = status.as_str(), "enrolment status updated");
        Ok(())
    }
}
