//! CLI command implementations.
//!
//! Each submodule implements one `agent-sandbox` command. Formatting is kept
//! in pure functions; `run` does the IO.

pub mod connect;
pub mod logs;
pub mod merge;
pub mod ports;
pub mod ps;
pub mod rm;
pub mod start;
pub mod stop;

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;

use crate::manager::{SandboxInfo, SandboxManager};
use crate::sandbox::{PortMapping, Progress};

/// Manager for the project containing the current directory.
pub(crate) fn manager() -> Result<SandboxManager> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    SandboxManager::discover(&cwd)
}

/// `container:host` pairs, comma separated.
pub(crate) fn format_port_pairs(ports: &PortMapping) -> String {
    ports
        .iter()
        .map(|(container, host)| format!("{container}:{host}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Summary printed after a sandbox comes up.
pub(crate) fn format_started(info: &SandboxInfo) -> String {
    let mut out = String::new();
    writeln!(
        &mut out,
        "{} Sandbox '{}' started",
        "✓".green(),
        info.name.cyan()
    )
    .unwrap();
    writeln!(
        &mut out,
        "  {}    {}",
        "Path:".dimmed(),
        info.workspace.display()
    )
    .unwrap();
    writeln!(&mut out, "  {}  {}", "Branch:".dimmed(), info.branch).unwrap();
    if !info.ports.is_empty() {
        writeln!(
            &mut out,
            "  {}   {}",
            "Ports:".dimmed(),
            format_port_pairs(&info.ports)
        )
        .unwrap();
    }
    out
}

/// Progress printed to stderr so stdout stays clean.
pub(crate) struct ConsoleProgress;

impl Progress for ConsoleProgress {
    fn step(&self, message: &str) {
        eprintln!("{} {}", "→".blue(), message);
    }

    fn build_output(&self, line: &str) {
        eprintln!("  {}", line.dimmed());
    }
}
