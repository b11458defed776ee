//! Admin CLI for the workflow orchestration and judgment core.
//!
//! This binary operates on data at rest (JSON dumps of a durable event log,
//! a prompt template, and recorded feedback) rather than against a live
//! engine process: the reference engine in this crate keeps its registries
//! in memory, so there is no running server for an admin tool to attach to
//! the way the teacher's admin CLI attaches to NATS. A real deployment
//! wiring this crate to a durable `EventLog`/`PromptStore` backend would
//! point these same subcommands at that backend instead of a file.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use workcell_core::events::{EventLog, InMemoryEventLog};
use workcell_core::learning::{FeedbackStore, PromptStore, TuneParams, Tuner};
use workcell_core::models::{Event, Feedback, PromptTemplate};

#[derive(Parser)]
#[command(name = "workcell")]
#[command(about = "Admin CLI for the workflow orchestration and judgment core")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded event log, filtered to one instance
    Replay {
        /// Path to a JSON array of `Event` records
        #[arg(long)]
        events: PathBuf,

        /// Instance id to filter to
        #[arg(long)]
        instance: uuid::Uuid,
    },

    /// Run the learning/auto-tune pass over recorded feedback
    Tune {
        /// Path to a JSON `PromptTemplate`
        #[arg(long)]
        template: PathBuf,

        /// Path to a JSON array of `Feedback` rows for that template
        #[arg(long)]
        feedback: PathBuf,

        /// Minimum rating (1-5) a feedback row must have to qualify
        #[arg(long, default_value_t = 4)]
        min_rating: u8,

        /// Only consider feedback recorded within this many days
        #[arg(long, default_value_t = 30)]
        days: i64,

        /// Cap on exemplars appended in one pass
        #[arg(long, default_value_t = 10)]
        max_exemplars: usize,

        /// Write the updated template here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let result = match cli.command {
        Commands::Replay { events, instance } => replay(&events, instance).await,
        Commands::Tune {
            template,
            feedback,
            min_rating,
            days,
            max_exemplars,
            out,
        } => tune(&template, &feedback, min_rating, days, max_exemplars, out.as_deref()).await,
    };

    match result {
        Ok(()) => ExitCode::from(0),
        Err(CliError::NotFound(msg)) => {
            error!("{}", msg);
            ExitCode::from(1)
        }
        Err(CliError::Internal(msg)) => {
            error!("{}", msg);
            ExitCode::from(2)
        }
    }
}

enum CliError {
    NotFound(String),
    Internal(String),
}

fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<T, CliError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| CliError::NotFound(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| CliError::Internal(format!("invalid JSON in {}: {e}", path.display())))
}

async fn replay(events_path: &std::path::Path, instance_id: uuid::Uuid) -> Result<(), CliError> {
    let events: Vec<Event> = read_json(events_path)?;
    let log = InMemoryEventLog::new();
    for event in events {
        log.append(event)
            .await
            .map_err(|e| CliError::Internal(e.to_string()))?;
    }

    let replayed = log
        .for_instance(instance_id)
        .await
        .map_err(|e| CliError::Internal(e.to_string()))?;
    if replayed.is_empty() {
        return Err(CliError::NotFound(format!("no events for instance {instance_id}")));
    }

    println!("{}", format!("Replaying {} event(s) for {instance_id}", replayed.len()).bold());
    for event in &replayed {
        let line = format!(
            "[{}] {:?} node={:?} {:?} -> {:?}",
            event.timestamp, event.event_type, event.node_id, event.from_state, event.to_state
        );
        if event.from_state.as_deref() == Some("FAILED") || event.to_state.as_deref() == Some("FAILED") {
            println!("{}", line.red());
        } else {
            println!("{line}");
        }
    }
    Ok(())
}

async fn tune(
    template_path: &std::path::Path,
    feedback_path: &std::path::Path,
    min_rating: u8,
    days: i64,
    max_exemplars: usize,
    out: Option<&std::path::Path>,
) -> Result<(), CliError> {
    let template: PromptTemplate = read_json(template_path)?;
    let feedback_rows: Vec<Feedback> = read_json(feedback_path)?;
    let prompt_template_id = template.id.clone();

    let prompts = std::sync::Arc::new(PromptStore::new());
    prompts
        .register(template)
        .map_err(|e| CliError::Internal(e.to_string()))?;
    let feedback_store = std::sync::Arc::new(FeedbackStore::new());
    for row in feedback_rows {
        feedback_store.record(row);
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    spinner.set_message("scoring feedback against rating/age window...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let tuner = Tuner::new(prompts.clone(), feedback_store);
    let params = TuneParams {
        min_rating,
        window_days: days,
        max_exemplars,
    };
    let summary = tuner
        .tune(&prompt_template_id, params, chrono::Utc::now())
        .map_err(|e| CliError::Internal(e.to_string()))?;
    spinner.finish_and_clear();

    info!(
        added = summary.added,
        total = summary.total,
        template = %summary.prompt_template_id,
        "tune pass complete"
    );
    println!(
        "{}",
        format!(
            "{}: added {} exemplar(s), {} total",
            summary.prompt_template_id, summary.added, summary.total
        )
        .green()
    );

    let updated = prompts
        .get(&prompt_template_id)
        .map_err(|e| CliError::Internal(e.to_string()))?;
    let rendered = serde_json::to_string_pretty(&updated).map_err(|e| CliError::Internal(e.to_string()))?;
    match out {
        Some(path) => fs::write(path, rendered).map_err(|e| CliError::Internal(e.to_string()))?,
        None => println!("{rendered}"),
    }
    Ok(())
}
