// Process lifecycle and worker-status commands, run directly against an
// in-process engine (there is no HTTP layer in this workspace to call
// out to).

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Subcommand;
use serde_json::Value;
use subscr_orchestrator::{
    Engine, InMemoryProcessStore, ProcessApi, ThreadPoolExecutor, WorkerQueueExecutor,
};
use uuid::Uuid;

use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum ExecutorChoice {
    Threadpool,
    Queue,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a registered workflow
    Start {
        workflow: String,
        /// JSON payload for the workflow's starting form, if it has one
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long, default_value = "operator")]
        user: String,
    },

    /// Resume a suspended or waiting process
    Resume {
        process_id: Uuid,
        /// One JSON payload per form page
        #[arg(long = "input")]
        inputs: Vec<String>,
        #[arg(long, default_value = "operator")]
        user: String,
    },

    /// Abort a running process
    Abort {
        process_id: Uuid,
        #[arg(long, default_value = "operator")]
        user: String,
    },

    /// Show a process's current row
    Show { process_id: Uuid },

    /// List every known process
    List,

    /// Show dispatch backend load
    WorkerStatus,
}

/// Everything a command needs: the registry-backed engine and the
/// dispatch backend chosen at startup.
pub struct Context {
    pub api: ProcessApi<InMemoryProcessStore>,
    pub threadpool: Option<Arc<ThreadPoolExecutor<InMemoryProcessStore>>>,
    pub queue: Option<Arc<WorkerQueueExecutor>>,
}

impl Context {
    pub fn new(executor: ExecutorChoice, max_workers: usize) -> Self {
        let store = Arc::new(InMemoryProcessStore::new());
        let registry = crate::demo_workflows::registry().expect("demo registry is well-formed");
        let engine = Arc::new(Engine::new(store, registry));

        match executor {
            ExecutorChoice::Threadpool => {
                let pool = Arc::new(ThreadPoolExecutor::new(engine.clone(), max_workers, true));
                Context {
                    api: ProcessApi::new(engine, pool.clone()),
                    threadpool: Some(pool),
                    queue: None,
                }
            }
            ExecutorChoice::Queue => {
                let queue = Arc::new(WorkerQueueExecutor::new(engine.clone(), max_workers, 256));
                Context {
                    api: ProcessApi::new(engine, queue.clone()),
                    threadpool: None,
                    queue: Some(queue),
                }
            }
        }
    }
}

pub async fn run(command: Commands, ctx: Context, output: OutputFormat, quiet: bool) -> Result<()> {
    match command {
        Commands::Start { workflow, input, user } => start(ctx, output, quiet, workflow, input, user).await,
        Commands::Resume { process_id, inputs, user } => resume(ctx, output, process_id, inputs, user).await,
        Commands::Abort { process_id, user } => abort(ctx, output, process_id, user).await,
        Commands::Show { process_id } => show(ctx, output, process_id).await,
        Commands::List => list(ctx, output).await,
        Commands::WorkerStatus => worker_status(ctx, output).await,
    }
}

async fn start(ctx: Context, output: OutputFormat, quiet: bool, workflow: String, input: String, user: String) -> Result<()> {
    let payload: Value = serde_json::from_str(&input).map_err(|e| anyhow!("invalid --input JSON: {e}"))?;
    let user_inputs = if payload.is_null() { vec![] } else { vec![payload] };

    let process_id = ctx.api.start_process(&workflow, user_inputs, &user).await?;

    if output.is_text() {
        if quiet {
            println!("{process_id}");
        } else {
            println!("Started process: {process_id}");
        }
    } else {
        output.print_value(&process_id);
    }
    Ok(())
}

async fn resume(ctx: Context, output: OutputFormat, process_id: Uuid, inputs: Vec<String>, user: String) -> Result<()> {
    let payloads: Result<Vec<Value>> = inputs
        .iter()
        .map(|raw| serde_json::from_str(raw).map_err(|e| anyhow!("invalid --input JSON: {e}")))
        .collect();
    let payloads = payloads?;

    ctx.api.resume_process(process_id, payloads, &user).await?;

    if output.is_text() {
        println!("Resumed process: {process_id}");
    } else {
        output.print_value(&process_id);
    }
    Ok(())
}

async fn abort(ctx: Context, output: OutputFormat, process_id: Uuid, user: String) -> Result<()> {
    ctx.api.abort_process(process_id, &user).await?;
    if output.is_text() {
        println!("Aborted process: {process_id}");
    } else {
        output.print_value(&process_id);
    }
    Ok(())
}

async fn show(ctx: Context, output: OutputFormat, process_id: Uuid) -> Result<()> {
    let row = ctx.api.process_row(process_id).await?;

    if output.is_text() {
        print_field("ID", &row.process_id.to_string());
        print_field("Workflow", &row.workflow_name);
        print_field("Status", &row.last_status.to_string());
        print_field("Last step", &row.last_step);
        print_field("Assignee", &row.assignee.to_string());
        print_field("Created by", &row.created_by);
    } else {
        output.print_value(&row);
    }
    Ok(())
}

async fn list(ctx: Context, output: OutputFormat) -> Result<()> {
    let rows = ctx.api.list_processes().await?;

    if output.is_text() {
        if rows.is_empty() {
            println!("No processes found");
            return Ok(());
        }
        print_table_header(&[("ID", 36), ("WORKFLOW", 20), ("STATUS", 18)]);
        for row in &rows {
            print_table_row(&[
                (&row.process_id.to_string(), 36),
                (&row.workflow_name, 20),
                (&row.last_status.to_string(), 18),
            ]);
        }
    } else {
        output.print_value(&rows);
    }
    Ok(())
}

async fn worker_status(ctx: Context, output: OutputFormat) -> Result<()> {
    let status = match (&ctx.threadpool, &ctx.queue) {
        (Some(pool), _) => pool.status(),
        (_, Some(queue)) => queue.status(),
        _ => unreachable!("exactly one dispatch backend is configured"),
    };

    if output.is_text() {
        print_field("Executor", &status.executor_type);
        print_field("Workers online", &status.number_of_workers_online.to_string());
        print_field("Queued jobs", &status.number_of_queued_jobs.to_string());
        print_field("Running jobs", &status.number_of_running_jobs.to_string());
    } else {
        output.print_value(&status);
    }
    Ok(())
}
