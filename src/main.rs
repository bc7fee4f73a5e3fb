use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use academic_results::config::Config;
use academic_results::service::ResultsService;
use academic_results::store::RecordStore;
use academic_results::{cohort, db, report, whatif};

#[derive(Parser)]
#[command(name = "academic-results")]
#[command(about = "GPA, CGPA and cohort standings from published semester results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the catalog schema
    InitDb,
    /// Load a small sample cohort
    Seed,
    /// Import grades from a long-format CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Validate and aggregate in memory without touching the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Show one student's results
    Student {
        id: String,
        /// Hypothetical grade, e.g. `1-2:121=B+`; may be repeated
        #[arg(long = "what-if", value_name = "KEY:COURSE=GRADE")]
        what_if: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Rank a group of students
    Rank {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        top: Option<usize>,
        /// Show students adjacent to this rank
        #[arg(long, conflicts_with = "top")]
        around: Option<usize>,
        #[arg(long, default_value_t = 2)]
        radius: usize,
        #[arg(long)]
        json: bool,
    },
    /// Summarize one course across every sitting
    Course {
        code: String,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown cohort report
    Report {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long, default_value_t = 10)]
        top: usize,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();

    if let Commands::Import { csv, dry_run: true } = &cli.command {
        let entries = db::read_grade_csv(csv)?;
        let store = db::load_into_memory(&entries)?;
        let tables = store.list_tables().await?.len();
        let service = ResultsService::new(store, Config::default());
        let ids: Vec<String> = entries.iter().map(|e| e.student_id.to_string()).collect();
        let standings = service.cohort(&ids).await?;
        println!(
            "{} grades for {} students across {} tables look valid.",
            entries.len(),
            standings.ranked.len(),
            tables
        );
        for student in &standings.students {
            for anomaly in &student.anomalies {
                println!("- {}: {anomaly}", student.id);
            }
        }
        return Ok(());
    }

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    info!(max_connections = config.max_connections, "connected to results database");

    let service = ResultsService::new(db::PgStore::new(pool.clone()), config);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let written = db::seed(&pool).await?;
            println!("Seeded {written} grades.");
        }
        Commands::Import { csv, .. } => {
            let written = db::import_csv(&pool, &csv).await?;
            println!("Wrote {written} grades from {}.", csv.display());
        }
        Commands::Student { id, what_if, json } => {
            let overrides = what_if
                .iter()
                .map(|raw| whatif::parse_override(raw))
                .collect::<Result<whatif::Overrides, _>>()?;

            let mut record = service.student(&id).await?;
            if !overrides.is_empty() {
                for (key, code) in whatif::unmatched(&record, &overrides) {
                    warn!(semester = %key, course = %code, "what-if grade names an unknown course");
                }
                record = whatif::recompute(&record, &overrides);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print!("{}", report::student_transcript(&record));
            }
        }
        Commands::Rank {
            ids,
            top,
            around,
            radius,
            json,
        } => {
            let standings = service.cohort(&ids).await?;
            let view = match (top, around) {
                (Some(n), _) => cohort::top_n(&standings.ranked, n),
                (None, Some(rank)) => cohort::around_rank(&standings.ranked, rank, radius),
                (None, None) => &standings.ranked[..],
            };

            if json {
                println!("{}", serde_json::to_string_pretty(view)?);
            } else if view.is_empty() {
                println!("No ranked students in this view.");
            } else {
                print!("{}", report::ranking_table(view));
            }
            for id in &standings.missing {
                println!("Not found: {id}");
            }
            for (id, reason) in &standings.failed {
                println!("Lookup failed: {id}: {reason}");
            }
        }
        Commands::Course { code, json } => {
            let summary = service.course(&code).await?;
            let baseline = match service.baseline().await {
                Ok(baseline) => Some(baseline),
                Err(err) => {
                    warn!(error = %err, "overall average unavailable");
                    None
                }
            };

            if json {
                let body = serde_json::json!({ "course": summary, "baseline": baseline });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print!("{}", report::course_report(&summary, baseline.as_ref()));
            }
        }
        Commands::Report { ids, top, out } => {
            let standings = service.cohort(&ids).await?;
            let markdown = report::cohort_report(&standings, top, Utc::now().date_naive());
            std::fs::write(&out, markdown)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
