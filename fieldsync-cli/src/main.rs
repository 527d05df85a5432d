#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing))]

mod settings;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use fieldsync_core::{EntityType, OfflineEngine, PendingAction, SyncOutcome, SyncStatus};
use std::io::IsTerminal;
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use uuid::Uuid;

/// Field Sync offline engine
#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(about = "Inspect and drive the Field Sync offline cache and action queue")]
struct Args {
    /// Configuration file (TOML/YAML/JSON); defaults to ./fieldsync.* when present
    #[arg(short, long, env = "FIELDSYNC_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connectivity, sync state and cache statistics
    Status,
    /// List queued actions in send order
    Pending,
    /// Drain the queue now
    Sync,
    /// Drop a queued action and roll back its local change
    Discard { id: Uuid },
    /// Put a failed action back into automatic sync
    Retry { id: Uuid },
    /// Bulk load equipment records from a JSON array file
    Load { file: String },
    /// Apply a JSON patch to an equipment record
    Update { id: String, patch: String },
    /// Queue a maintenance log (JSON record with equipmentId)
    LogMaintenance { record: String },
    /// Queue a new equipment record (JSON)
    Create { record: String },
    /// Show a cached record
    Get { entity_type: String, id: String },
    /// Stay running and sync whenever connectivity returns
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    init_tracing(args.verbose, args.json_logs)?;

    let config = settings::load(args.config.as_deref())?;
    let engine = OfflineEngine::new(config)
        .await
        .context("Failed to start offline engine")?;

    let result = run(&engine, args.command).await;
    engine.shutdown().await;
    result
}

async fn run(engine: &OfflineEngine, command: Command) -> Result<()> {
    match command {
        Command::Status => print_status(engine).await,
        Command::Pending => {
            let actions = engine.pending_actions().await;
            if actions.is_empty() {
                println!("{}", "No pending actions".bright_green());
            }
            for action in &actions {
                print_action(action);
            }
        }
        Command::Sync => {
            let outcome = engine.sync_now().await;
            print_outcome(outcome);
            if matches!(outcome, SyncOutcome::Failed { .. }) {
                bail!("sync failed, see log for details");
            }
        }
        Command::Discard { id } => {
            if !engine.discard_action(id).await {
                bail!("action {} not found or currently being sent", id);
            }
            println!("{} {}", "Discarded".bright_yellow(), id);
        }
        Command::Retry { id } => {
            if !engine.retry_action(id).await {
                bail!("action {} is not a failed action", id);
            }
            println!("{} {}", "Re-queued".bright_green(), id);
        }
        Command::Load { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file))?;
            let records: Vec<serde_json::Value> =
                serde_json::from_str(&raw).with_context(|| format!("{} must hold a JSON array", file))?;
            engine.cache_equipment(&records).await;
            println!("{} {} equipment records", "Loaded".bright_green(), records.len());
        }
        Command::Update { id, patch } => {
            let patch = parse_json(&patch)?;
            accepted(engine.update_equipment_offline(&id, patch).await, "update")?;
        }
        Command::LogMaintenance { record } => {
            let record = parse_json(&record)?;
            accepted(engine.add_maintenance_log_offline(record).await, "maintenance log")?;
        }
        Command::Create { record } => {
            let record = parse_json(&record)?;
            accepted(engine.create_equipment_offline(record).await, "equipment record")?;
        }
        Command::Get { entity_type, id } => {
            let entity_type = EntityType::from_str(&entity_type)?;
            match engine.get_cached(entity_type, &id).await {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => bail!("{} {} is not cached", entity_type, id),
            }
        }
        Command::Watch => watch(engine).await?,
    }
    Ok(())
}

async fn watch(engine: &OfflineEngine) -> Result<()> {
    info!("Watching connectivity, press Ctrl-C to stop");
    print_outcome(engine.sync_now().await);

    let mut state = engine.subscribe_state();
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                println!(
                    "{} {} {}",
                    status_label(current.status),
                    online_label(current.is_online),
                    current
                        .last_synced_at
                        .map(|t| format!("last sync {}", t.to_rfc3339()))
                        .unwrap_or_default()
                        .bright_black()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping");
                break;
            }
        }
    }
    Ok(())
}

async fn print_status(engine: &OfflineEngine) {
    let state = engine.sync_state();
    println!("{:<14} {}", "Network:", online_label(state.is_online));
    println!("{:<14} {}", "Sync:", status_label(state.status));
    println!(
        "{:<14} {}",
        "Last sync:",
        state
            .last_synced_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );

    match engine.get_cache_stats().await {
        Some(stats) => {
            println!("{:<14} {}", "Equipment:", stats.cached_equipment);
            println!("{:<14} {}", "Maint. logs:", stats.cached_maintenance_logs);
            println!("{:<14} {}", "Queued:", stats.pending_action_count.to_string().bright_yellow());
            println!("{:<14} {}", "Failed:", stats.failed_action_count.to_string().bright_red());
        }
        None => println!("{}", "Local store not initialized".bright_black()),
    }
}

fn print_action(action: &PendingAction) {
    let status = if action.is_failed_fatal() {
        "FAILED ".bright_red()
    } else {
        "PENDING".bright_yellow()
    };
    println!(
        "{} {} {:<20} {} {} (attempts: {})",
        status,
        action.id.to_string().bright_black(),
        action.kind.as_str().bright_cyan(),
        action.method,
        action.url,
        action.attempts
    );
    if let Some(error) = &action.last_error {
        println!("        {}", error.bright_red());
    }
}

fn print_outcome(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::NoOp => println!("{}", "Nothing to sync".bright_black()),
        SyncOutcome::Synced { applied, rejected } => {
            println!("{} applied {}, rejected {}", "Synced:".bright_green(), applied, rejected)
        }
        SyncOutcome::Interrupted { applied } => println!(
            "{} applied {}, remaining actions stay queued",
            "Interrupted:".bright_yellow(),
            applied
        ),
        SyncOutcome::Failed { applied } => println!("{} applied {}", "Failed:".bright_red(), applied),
    }
}

fn status_label(status: SyncStatus) -> ColoredString {
    match status {
        SyncStatus::Idle => "idle".bright_green(),
        SyncStatus::Syncing => "syncing".bright_cyan(),
        SyncStatus::Error => "error".bright_red(),
    }
}

fn online_label(online: bool) -> ColoredString {
    if online {
        "online".bright_green()
    } else {
        "offline".bright_red()
    }
}

fn parse_json(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).context("Argument is not valid JSON")
}

fn accepted(ok: bool, what: &str) -> Result<()> {
    if !ok {
        bail!("{} was not accepted, see log for details", what);
    }
    println!("{} {}", "Queued".bright_green(), what);
    Ok(())
}

fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("fieldsync={level},fieldsync_core={level},sqlx=warn,reqwest=info").into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init()?;
    } else {
        let use_colors = std::env::var("NO_COLOR").is_err() && std::io::stderr().is_terminal();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(use_colors),
            )
            .try_init()?;
    }

    Ok(())
}
