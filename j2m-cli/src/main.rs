use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use j2m_core::{DurableQueue, IgnoreListStore, KeyValueStore, RoomRecord, SqliteStore};

/// j2m: inspect and manage the bridge's queue database
#[derive(Parser, Debug)]
#[command(name = "j2m")]
#[command(about = "Operator tool for the tracker-to-chat bridge", long_about = None)]
struct Cli {
    /// Path of the queue database
    #[arg(long, env = "J2M_DB", default_value = "j2m-queue.db", global = true)]
    db: PathBuf,

    /// Key prefix of the deployment
    #[arg(long, env = "QUEUE_PREFIX", default_value = "j2m:", global = true)]
    prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect or clear queued records
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Manage per-project ignored issue types
    #[command(subcommand)]
    Ignore(IgnoreCommand),
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// List queued room intents and action records
    List {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete every queued record
    Purge {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum IgnoreCommand {
    /// Show the ignore list
    List,
    /// Ignore issues of the given types in a project
    Add {
        project: String,
        #[arg(required = true, num_args = 1..)]
        types: Vec<String>,
    },
    /// Stop ignoring the given issue types in a project
    Remove {
        project: String,
        #[arg(required = true, num_args = 1..)]
        types: Vec<String>,
    },
    /// Remove all rules of a project
    Clear { project: String },
}

fn open_store(path: &Path) -> Result<Arc<dyn KeyValueStore>> {
    let store = SqliteStore::new(path)
        .with_context(|| format!("Failed to open queue database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn room_label(room: &RoomRecord) -> String {
    match (&room.issue, &room.project_key) {
        (Some(issue), Some(project)) => format!("{} (and project {})", issue.key, project),
        (Some(issue), None) => issue.key.clone(),
        (None, Some(project)) => format!("project {}", project),
        (None, None) => "<empty>".to_string(),
    }
}

async fn run_queue(queue: DurableQueue, command: QueueCommand) -> Result<()> {
    match command {
        QueueCommand::List { json } => {
            let snapshot = queue.snapshot().await.context("Failed to read queue")?;
            if json {
                let value = serde_json::json!({
                    "rooms": snapshot.rooms,
                    "actions": snapshot.actions,
                    "corrupt": snapshot.corrupt_keys,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(());
            }

            println!("{} room intent(s)", snapshot.rooms.len());
            for room in &snapshot.rooms {
                println!("  {}", room_label(room));
            }
            println!("{} action record(s)", snapshot.actions.len());
            for record in &snapshot.actions {
                println!("  {}  {}", record.redis_key, record.func_name());
            }
            if !snapshot.corrupt_keys.is_empty() {
                println!("{} unreadable record(s)", snapshot.corrupt_keys.len());
                for key in &snapshot.corrupt_keys {
                    println!("  {}", key);
                }
            }
            Ok(())
        }
        QueueCommand::Purge { yes } => {
            if !yes {
                return Err(anyhow!("Refusing to purge without --yes"));
            }
            let removed = queue.purge().await.context("Failed to purge queue")?;
            println!("Removed {} record(s)", removed);
            Ok(())
        }
    }
}

async fn run_ignore(ignore: IgnoreListStore, command: IgnoreCommand) -> Result<()> {
    match command {
        IgnoreCommand::List => {
            let list = ignore.load().await.context("Failed to read ignore list")?;
            if list.is_empty() {
                println!("No ignore rules");
            }
            for (project, rules) in &list.0 {
                println!("{}: {}", project, rules.task_type.join(", "));
                if !rules.admins.is_empty() {
                    println!("  admins: {}", rules.admins.join(", "));
                }
            }
            Ok(())
        }
        IgnoreCommand::Add { project, types } => {
            let rules = ignore
                .add_task_types(&project, &types)
                .await
                .context("Failed to update ignore list")?;
            println!("{}: {}", project, rules.task_type.join(", "));
            Ok(())
        }
        IgnoreCommand::Remove { project, types } => {
            match ignore
                .remove_task_types(&project, &types)
                .await
                .context("Failed to update ignore list")?
            {
                Some(rules) => println!("{}: {}", project, rules.task_type.join(", ")),
                None => println!("{} has no ignore rules", project),
            }
            Ok(())
        }
        IgnoreCommand::Clear { project } => {
            if ignore
                .clear_project(&project)
                .await
                .context("Failed to update ignore list")?
            {
                println!("Cleared rules of {}", project);
            } else {
                println!("{} has no ignore rules", project);
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = open_store(&cli.db)?;

    match cli.command {
        Commands::Queue(command) => run_queue(DurableQueue::new(store, cli.prefix), command).await,
        Commands::Ignore(command) => {
            run_ignore(IgnoreListStore::new(store, &cli.prefix), command).await
        }
    }
}
