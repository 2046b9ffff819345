// Orchestrator CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json output formats for scripting.
// Design Decision: run entirely in-process against an InMemoryProcessStore;
// there is no HTTP server in this workspace to talk to.

mod commands;
mod demo_workflows;
mod output;

use clap::Parser;

use commands::ExecutorChoice;

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Orchestrator CLI - start, resume, and inspect workflow processes")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    /// Dispatch backend to run processes on
    #[arg(long, value_enum, default_value = "threadpool")]
    pub executor: ExecutorChoice,

    /// Maximum concurrent workers for the chosen dispatch backend
    #[arg(long, default_value = "4")]
    pub max_workers: usize,

    #[command(subcommand)]
    pub command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);
    let ctx = commands::Context::new(cli.executor, cli.max_workers);

    commands::run(cli.command, ctx, output_format, cli.quiet).await
}
