use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod dataset;
mod db;
mod error;
mod forest;
mod models;
mod pipeline;
mod report;
mod trainer;

#[derive(Parser)]
#[command(name = "stress-pipeline")]
#[command(about = "DASS-21 stress survey training pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the DASS-21 survey structure and sample respondents
    Seed,
    /// Import respondents and their stress answers from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "stress")]
        category: String,
    },
    /// Retrain the stress classifier and persist predictions
    Train {
        #[arg(long, default_value = "stress")]
        category: String,
        #[arg(long, default_value = "stress_model.json")]
        model_out: PathBuf,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report of labels and predictions
    Report {
        #[arg(long, default_value_t = 10)]
        limit: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv, category } => {
            let category = db::resolve_stress_category(&pool, &category).await?;
            let imported = db::import_csv(&pool, &category, &csv).await?;
            println!("Imported {imported} respondents from {}.", csv.display());
        }
        Commands::Train {
            category,
            model_out,
            seed,
            json,
        } => {
            let category = db::resolve_stress_category(&pool, &category).await?;
            let config = pipeline::PipelineConfig {
                model_path: model_out.clone(),
                seed,
            };

            match pipeline::run_stress_pipeline(&pool, &category, &config).await? {
                pipeline::PipelineOutcome::NoUsableData => {
                    println!("No usable training data; nothing was trained.");
                }
                pipeline::PipelineOutcome::Completed(summary) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&summary)?);
                    } else {
                        println!("Accuracy: {:.2}%", summary.accuracy);
                        println!("MAE: {:.3}  RMSE: {:.3}", summary.mae, summary.rmse);
                        println!(
                            "Train/test split: {} / {}",
                            summary.train_count, summary.test_count
                        );
                        for (label, metrics) in &summary.report {
                            println!(
                                "- {label}: precision {:.2} recall {:.2} f1 {:.2} (support {})",
                                metrics.precision, metrics.recall, metrics.f1, metrics.support
                            );
                        }
                        println!("Model written to {}.", model_out.display());
                    }
                }
            }
        }
        Commands::Report { limit, out } => {
            let labels = db::fetch_label_summary(&pool).await?;
            let predictions = db::fetch_recent_predictions(&pool, limit).await?;
            let report = report::build_report(&labels, &predictions);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
