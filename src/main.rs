use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use flight_priority::config::Settings;
use flight_priority::dashboard::{build_queue, QueueOptions};
use flight_priority::db::{self, PgMetricsProvider};
use flight_priority::lifecycle::{run_lifecycle_check, LogNotifier};
use flight_priority::priority::SortKey;
use flight_priority::report;

#[derive(Parser)]
#[command(name = "flight-priority")]
#[command(about = "Instructor queue ranking for flight-training students", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demo course
    Seed,
    /// Import training events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Store a weight (plugin-wide) or a course threshold
    Configure {
        #[arg(long)]
        name: String,
        #[arg(long)]
        value: String,
        /// Store as a course setting instead of a plugin-wide one
        #[arg(long)]
        course: Option<i64>,
    },
    /// Rank a course's students for booking
    Rank {
        #[arg(long)]
        course: i64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = SortKey::Score)]
        sort: SortKey,
        /// Only show overdue and late students
        #[arg(long)]
        flagged_only: bool,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown queue report
    Report {
        #[arg(long)]
        course: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Run the on-hold and suspension check
    Cron {
        #[arg(long)]
        course: i64,
        /// Report due actions without notifying or updating enrolments
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let pool = db::connect(&settings).await?;
    let provider = PgMetricsProvider::new(pool.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted for course {}.", db::SEED_COURSE_ID);
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} events from {}.", csv.display());
        }
        Commands::Configure {
            name,
            value,
            course,
        } => {
            db::set_config(&pool, course, &name, &value).await?;
            match course {
                Some(course) => println!("Set {name} = {value} for course {course}."),
                None => println!("Set {name} = {value}."),
            }
        }
        Commands::Rank {
            course,
            limit,
            sort,
            flagged_only,
            json,
        } => {
            let options = QueueOptions {
                sort,
                flagged_only,
                limit: Some(limit),
            };
            let queue = build_queue(&provider, course, Utc::now(), options)
                .await
                .with_context(|| format!("failed to rank course {course}"))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&queue)?);
                return Ok(());
            }
            if queue.rows.is_empty() {
                println!("No students to schedule.");
                return Ok(());
            }

            println!("Students by booking priority:");
            for row in &queue.rows {
                println!("{}", report::queue_line(row));
            }
        }
        Commands::Report { course, out } => {
            let queue = build_queue(&provider, course, Utc::now(), QueueOptions::default())
                .await
                .with_context(|| format!("failed to rank course {course}"))?;
            std::fs::write(&out, report::build_report(&queue))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Cron { course, dry_run } => {
            let summary = run_lifecycle_check(&provider, &LogNotifier, course, Utc::now(), dry_run)
                .await
                .with_context(|| format!("lifecycle check failed for course {course}"))?;

            println!(
                "Checked {} students: {} warned, {} placed on hold, {} suspended, \
                 {} reactivated{}.",
                summary.checked,
                summary.warned,
                summary.placed_on_hold,
                summary.suspended,
                summary.reactivated,
                if dry_run { " (dry run)" } else { "" }
            );
            for line in report::lifecycle_lines(&summary) {
                println!("{line}");
            }
        }
    }

    Ok(())
}
