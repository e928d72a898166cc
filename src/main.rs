//! `agent-sandbox`: isolated development sandboxes built from a project's
//! devcontainer, each with its own git clone, branch and Docker container.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod devcontainer;
mod git;
mod manager;
mod sandbox;

#[derive(Parser)]
#[command(name = "agent-sandbox")]
#[command(
    author,
    version,
    about = "Sandboxed development environments using git clones and Docker"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a sandbox without connecting to it
    Start {
        /// Sandbox name
        name: String,

        /// Branch to check out (default: sandbox/<name>)
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Connect to a sandbox's shell, starting it if needed
    Connect {
        /// Sandbox name (default: a generated name)
        name: Option<String>,

        /// Shell to use (default: from config or /bin/bash)
        #[arg(short, long)]
        shell: Option<String>,

        /// Branch to check out if starting (default: sandbox/<name>)
        #[arg(short, long)]
        branch: Option<String>,

        /// Start the sandbox without prompting
        #[arg(short, long)]
        yes: bool,
    },

    /// Stop a sandbox
    Stop {
        /// Sandbox name
        name: String,
    },

    /// Stop all running sandboxes
    #[command(alias = "stop-all")]
    Stopall {
        /// Stop sandboxes from all projects (default: only this project)
        #[arg(short, long)]
        all: bool,
    },

    /// Remove a sandbox and its clone
    Rm {
        /// Sandbox name
        name: String,
    },

    /// List running sandboxes
    #[command(alias = "list")]
    Ps {
        /// List sandboxes from all projects (default: only this project)
        #[arg(short, long)]
        all: bool,
    },

    /// Show ports for a sandbox
    Ports {
        /// Sandbox name
        name: String,
    },

    /// Show logs for a sandbox
    Logs {
        /// Sandbox name
        name: String,

        /// Print the logs and exit instead of following them
        #[arg(long)]
        no_follow: bool,
    },

    /// Merge a sandbox's branch into the current branch
    Merge {
        /// Sandbox name or branch
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "agent_sandbox=debug"
    } else {
        "agent_sandbox=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Start { name, branch } => {
            commands::start::run(&name, branch.as_deref()).await?;
        }
        Commands::Connect {
            name,
            shell,
            branch,
            yes,
        } => {
            commands::connect::run(name.as_deref(), shell.as_deref(), branch.as_deref(), yes)
                .await?;
        }
        Commands::Stop { name } => {
            commands::stop::run(&name).await?;
        }
        Commands::Stopall { all } => {
            commands::stop::run_all(all).await?;
        }
        Commands::Rm { name } => {
            commands::rm::run(&name).await?;
        }
        Commands::Ps { all } => {
            commands::ps::run(all).await?;
        }
        Commands::Ports { name } => {
            commands::ports::run(&name).await?;
        }
        Commands::Logs { name, no_follow } => {
            commands::logs::run(&name, !no_follow).await?;
        }
        Commands::Merge { name } => {
            return commands::merge::run(&name).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}
