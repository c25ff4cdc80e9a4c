use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use log::{info, warn};

use upkeep_core::sync::{ApplyOutcome, ChangeEvent, TaskListView};
use upkeep_core::tasks::{Task, TaskId, TaskStatus, TaskUpdate};
use upkeep_task_sync::config::{
    DEFAULT_SCHEMA, DEFAULT_TABLE, ENV_ACCESS_TOKEN, ENV_API_KEY, ENV_SCHEMA, ENV_TABLE, ENV_URL,
};
use upkeep_task_sync::{init_shared, TaskSyncClient, TaskSyncConfig};

#[derive(Parser)]
#[command(name = "upkeep")]
#[command(about = "Maintenance task sync client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project base URL
    #[arg(long, env = ENV_URL)]
    url: String,

    /// Publishable (anon) API key
    #[arg(long, env = ENV_API_KEY, hide_env_values = true)]
    anon_key: String,

    /// User session token, defaults to the anon key
    #[arg(long, env = ENV_ACCESS_TOKEN, hide_env_values = true)]
    access_token: Option<String>,

    #[arg(long, default_value = DEFAULT_SCHEMA, env = ENV_SCHEMA)]
    schema: String,

    #[arg(long, default_value = DEFAULT_TABLE, env = ENV_TABLE)]
    table: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a task
    Create {
        description: String,
        #[arg(long, default_value = "pending")]
        status: String,
    },
    /// Update the description and/or status of a task
    Update {
        id: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Print changes to the task table until interrupted
    Watch {
        /// List open tasks after every change
        #[arg(long)]
        active_only: bool,
    },
}

impl Cli {
    fn config(&self) -> TaskSyncConfig {
        let mut config = TaskSyncConfig::new(&self.url, &self.anon_key)
            .with_schema(&self.schema)
            .with_table(&self.table);
        if let Some(token) = &self.access_token {
            config = config.with_access_token(token);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let remote = init_shared(cli.config()).context("Invalid task sync configuration")?;
    let client = TaskSyncClient::new(remote);

    match cli.command {
        Commands::Create {
            description,
            status,
        } => {
            let status: TaskStatus = status.parse()?;
            let task = client
                .create_task(Task::new(description).with_status(status))
                .await?;
            print_task(&task)?;
        }
        Commands::Update {
            id,
            description,
            status,
        } => {
            let updates = TaskUpdate {
                description,
                status: status.as_deref().map(str::parse::<TaskStatus>).transpose()?,
            };
            if updates.is_empty() {
                anyhow::bail!("Nothing to update: pass --description and/or --status");
            }
            let task = client.update_task(&TaskId::new(id), updates).await?;
            print_task(&task)?;
        }
        Commands::Watch { active_only } => watch(&client, active_only).await?,
    }

    Ok(())
}

async fn watch(client: &TaskSyncClient, active_only: bool) -> Result<()> {
    let mut subscription = client.subscribe().await?;
    let mut view = TaskListView::new();
    info!(
        "Watching {} for changes. Press Ctrl+C to stop.",
        client.filter().channel_name()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                subscription.unsubscribe();
                break;
            }
            event = subscription.next() => {
                let Some(event) = event else {
                    warn!("Change feed ended");
                    break;
                };
                if view.apply(&event) == ApplyOutcome::Ignored {
                    continue;
                }
                print_event(&event);
                print_view(&view, active_only);
            }
        }
    }

    Ok(())
}

fn print_task(task: &Task) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(task)?);
    Ok(())
}

fn print_event(event: &ChangeEvent) {
    let id = event.task_id().map(TaskId::as_str).unwrap_or("?");
    match &event.new {
        Some(task) => println!("{} {} [{}] {}", event.event_type, id, task.status, task.description),
        None => println!("{} {}", event.event_type, id),
    }
}

fn print_view(view: &TaskListView, active_only: bool) {
    let summary = view.summary();
    println!(
        "  {} tasks: {} pending, {} in progress, {} completed, {} cancelled",
        summary.total(),
        summary.pending,
        summary.in_progress,
        summary.completed,
        summary.cancelled
    );
    if active_only {
        for task in view.active() {
            let id = task.id.as_ref().map(TaskId::as_str).unwrap_or("?");
            println!("  - {} [{}] {}", id, task.status, task.description);
        }
    }
}
