use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use runbook::runner::AskMode;

mod cmd;

#[derive(Parser)]
#[command(name = "runbook")]
#[command(
    version,
    about = "Run markdown code blocks as controlled, replayable shell sessions"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Tag selection, shared by `run` and `blocks`.
#[derive(Args, Clone, Debug)]
pub struct FilterArgs {
    /// Select blocks carrying any of these tags (`#` or comma separated)
    #[arg(short = 't', long)]
    pub tags: Option<String>,

    /// Select only blocks carrying every one of these tags
    #[arg(short = 'T', long)]
    pub must_have_tags: Option<String>,

    /// Drop blocks carrying any of these tags
    #[arg(short = 'N', long)]
    pub must_not_have_tags: Option<String>,
}

/// Execution controls, shared by `run` and `replay`.
#[derive(Args, Clone, Debug)]
pub struct ControlArgs {
    /// 1-based step to start from; earlier steps are skipped
    #[arg(short = 's', long, default_value_t = 1)]
    pub step: u32,

    /// Review this step before it runs, even with `--ask never` (repeatable)
    #[arg(short = 'b', long = "breakpoint", value_name = "STEP")]
    pub breakpoints: Vec<u32>,

    /// When to stop for confirmation
    #[arg(short = 'a', long, value_enum)]
    pub ask: Option<AskMode>,

    /// Seconds to wait after each successful step
    #[arg(short = 'p', long)]
    pub pause: Option<f64>,

    /// Automatic retries per failing step before the run aborts
    #[arg(short = 'r', long)]
    pub retry: Option<u32>,

    /// Seconds to wait before each automatic retry
    #[arg(short = 'P', long)]
    pub retry_pause: Option<f64>,

    /// Let system environment values override declared ones
    #[arg(short = 'i', long)]
    pub inherit_env: bool,

    /// Run every block inside one persistent process of this interpreter
    #[arg(long, value_name = "INTERPRETER")]
    pub session: Option<String>,

    /// Write the execution trace to this file
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute code blocks from a markdown document
    Run {
        /// Markdown document to run
        file: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        #[command(flatten)]
        control: ControlArgs,
    },
    /// Re-run the code saved in a trace
    Replay {
        /// Trace file written by `run --output`
        trace: PathBuf,
        #[command(flatten)]
        control: ControlArgs,
    },
    /// List the tags used in a document
    Tags {
        /// Markdown document to inspect
        file: PathBuf,
    },
    /// Show the blocks a filter selects
    Blocks {
        /// Markdown document to inspect
        file: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        /// Print the blocks as JSON instead of a listing
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runbook=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Run {
            file,
            filter,
            control,
        } => cmd::cmd_run(file, filter, control).await?,
        Commands::Replay { trace, control } => cmd::cmd_replay(trace, control).await?,
        Commands::Tags { file } => cmd::cmd_tags(file)?,
        Commands::Blocks { file, filter, json } => cmd::cmd_blocks(file, filter, *json)?,
    }
    Ok(())
}
