mod config;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use coursetrack_core::AttachmentItem;
use coursetrack_store_sqlite::{BlobStore, KvStore, NotesCache, TrackerSession};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;

const KV_DB_FILE: &str = "tracker.sqlite3";

#[derive(Debug, Parser)]
#[command(name = "ct")]
#[command(about = "Course tracker CLI")]
struct Cli {
    /// Directory holding the tracker databases and optional config.json
    #[arg(long, env = "COURSETRACK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Mark a task done, or un-mark it if already done
    Toggle { task_id: String },
    /// Read commands from stdin: `toggle <id>`, `undo`, `stats`, `status`, `quit`
    Shell,
    Status,
    Stats,
    Notes {
        #[command(subcommand)]
        command: NotesCommand,
    },
    Export(ExportArgs),
    Import(ImportArgs),
}

#[derive(Debug, Subcommand)]
enum NotesCommand {
    /// Attach a file to an owner (course or exam)
    Add {
        owner: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "")]
        name: String,
    },
    List {
        owner: String,
    },
    Delete {
        owner: String,
        item_id: String,
    },
    Clear {
        owner: String,
    },
    /// Item counts and payload sizes across every owner
    Summary,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir)?;
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let config = AppConfig::load(&data_dir)?;
    init_tracing(&config.log_level);
    tracing::debug!("Using data dir {}", data_dir.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run(cli.command, &data_dir, &config))
}

fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => dirs::data_dir()
            .map(|dir| dir.join("coursetrack"))
            .ok_or_else(|| anyhow!("no platform data directory; pass --data-dir")),
    }
}

fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so stdout stays a clean JSON channel.
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(false),
        )
        .with(env_filter)
        .try_init();
}

async fn run(command: Command, data_dir: &Path, config: &AppConfig) -> Result<()> {
    match command {
        Command::Notes { command } => run_notes(command, data_dir).await,
        command => {
            let session = open_session(data_dir, config)?;
            let result = run_session(command, &session).await;
            close_session(session).await?;
            result
        }
    }
}

fn open_session(data_dir: &Path, config: &AppConfig) -> Result<TrackerSession> {
    let path = data_dir.join(KV_DB_FILE);
    let kv = KvStore::open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_quota(config.storage_quota_bytes);
    Ok(TrackerSession::open(Arc::new(kv), &config.session_config()))
}

async fn close_session(session: TrackerSession) -> Result<()> {
    let saved = session.flush().await;
    session.shutdown().await;
    if !saved {
        bail!("failed to persist tracker state; see log for details");
    }
    Ok(())
}

async fn run_session(command: Command, session: &TrackerSession) -> Result<()> {
    match command {
        Command::Toggle { task_id } => emit_json(&toggle_json(session, &task_id)),
        Command::Status => emit_json(&status_json(session)),
        Command::Stats => emit_json(&stats_json(session)?),
        Command::Shell => run_shell(session).await,
        Command::Export(args) => run_export(&args, session),
        Command::Import(args) => run_import(&args, session),
        Command::Notes { .. } => bail!("notes commands do not use the tracker session"),
    }
}

async fn run_shell(session: &TrackerSession) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let mut parts = line.split_whitespace();
        let response = match (parts.next(), parts.next()) {
            (None, _) => continue,
            (Some("quit" | "exit"), _) => break,
            (Some("toggle"), Some(task_id)) => toggle_json(session, task_id),
            (Some("toggle"), None) => json!({ "error": "usage: toggle <task-id>" }),
            (Some("undo"), _) => match session.undo() {
                Some(entry) => json!({ "undone": entry }),
                None => json!({ "undone": null }),
            },
            (Some("stats"), _) => stats_json(session)?,
            (Some("status"), _) => status_json(session),
            (Some(other), _) => json!({ "error": format!("unknown command `{other}`") }),
        };
        println!("{}", serde_json::to_string(&response)?);
    }
    Ok(())
}

fn toggle_json(session: &TrackerSession, task_id: &str) -> Value {
    let outcome = session.toggle_task(task_id);
    json!({
        "task_id": outcome.id,
        "was_done": outcome.was_done,
        "is_done": outcome.is_done,
        "just_completed": outcome.just_completed(),
    })
}

fn status_json(session: &TrackerSession) -> Value {
    let snapshot = session.snapshot();
    let courses = session.catalog().as_array().map_or(0, Vec::len);
    json!({
        "completed_count": snapshot.completed.len(),
        "completed_tasks": snapshot.completed,
        "history_entries": snapshot.history.len(),
        "courses": courses,
        "undo_depth": session.undo_depth(),
        "last_backup": session.last_backup().map(|ts| ts.to_rfc3339()),
    })
}

fn stats_json(session: &TrackerSession) -> Result<Value> {
    Ok(serde_json::to_value(session.stats(&Local::now()))?)
}

fn run_export(args: &ExportArgs, session: &TrackerSession) -> Result<()> {
    let document = session.export(Utc::now())?;
    let body = serde_json::to_string_pretty(&document)?;
    fs::write(&args.out, body)
        .with_context(|| format!("failed to write backup {}", args.out.display()))?;

    tracing::info!("Exported backup to {}", args.out.display());
    emit_json(&json!({
        "out": args.out.display().to_string(),
        "completed_tasks": document.completed_tasks.len(),
        "exported_at": document.exported_at,
    }))
}

fn run_import(args: &ImportArgs, session: &TrackerSession) -> Result<()> {
    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read backup {}", args.input.display()))?;
    let summary = session.import(&raw)?;
    emit_json(&serde_json::to_value(summary)?)
}

async fn run_notes(command: NotesCommand, data_dir: &Path) -> Result<()> {
    let store = Arc::new(BlobStore::in_dir(data_dir));
    let result = run_notes_command(command, &store).await;
    store.close();
    result
}

async fn run_notes_command(command: NotesCommand, store: &Arc<BlobStore>) -> Result<()> {
    match command {
        NotesCommand::Add { owner, file, name } => {
            let notes = load_notes(store, owner).await?;
            let saved = notes
                .upload_file(&file, &name, |progress| {
                    tracing::debug!("Read {}% of {}", progress.percent(), file.display());
                })
                .await?;
            if !saved {
                bail!(notes_failure(&notes));
            }
            let items = notes.items();
            let added = items.last().map(item_json);
            emit_json(&json!({ "owner": notes.owner_id(), "added": added, "count": items.len() }))
        }
        NotesCommand::List { owner } => {
            let notes = load_notes(store, owner).await?;
            let items: Vec<Value> = notes.items().iter().map(item_json).collect();
            emit_json(&json!({ "owner": notes.owner_id(), "items": items }))
        }
        NotesCommand::Delete { owner, item_id } => {
            let notes = load_notes(store, owner).await?;
            if !notes.delete_item(&item_id).await {
                bail!(notes_failure(&notes));
            }
            emit_json(&json!({ "owner": notes.owner_id(), "count": notes.items().len() }))
        }
        NotesCommand::Clear { owner } => {
            let notes = load_notes(store, owner).await?;
            notes.clear_all().await;
            emit_json(&json!({ "owner": notes.owner_id(), "count": 0 }))
        }
        NotesCommand::Summary => {
            let all = store.load_all().await?;
            let by_owner: BTreeMap<&str, usize> = all
                .iter()
                .map(|(owner, items)| (owner.as_str(), items.len()))
                .collect();
            let total_bytes: usize = all
                .values()
                .flatten()
                .map(AttachmentItem::payload_bytes)
                .sum();
            emit_json(&json!({
                "owners": by_owner.len(),
                "items": by_owner.values().sum::<usize>(),
                "total_bytes": total_bytes,
                "by_owner": by_owner,
            }))
        }
    }
}

async fn load_notes(store: &Arc<BlobStore>, owner: String) -> Result<NotesCache> {
    let notes = NotesCache::load(Arc::clone(store), owner).await;
    if let Some(err) = notes.error() {
        return Err(err.into());
    }
    Ok(notes)
}

fn notes_failure(notes: &NotesCache) -> String {
    notes
        .error()
        .map_or_else(|| "notes operation failed".to_string(), |err| err.to_string())
}

fn item_json(item: &AttachmentItem) -> Value {
    json!({
        "id": item.id,
        "name": item.name,
        "original_file_name": item.original_file_name,
        "bytes": item.payload_bytes(),
        "uploaded_at": item.upload_timestamp.to_rfc3339(),
    })
}

fn emit_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
