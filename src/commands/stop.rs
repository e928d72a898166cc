//! Stop one sandbox or every running sandbox.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;

use super::manager;

/// Message for `stop`.
pub fn format_stopped(name: &str, was_running: bool) -> String {
    if was_running {
        format!("{} Sandbox '{}' stopped.\n", "✓".green(), name)
    } else {
        format!("{} Sandbox '{}' was not running.\n", "ℹ".blue(), name)
    }
}

/// Message for `stopall`.
pub fn format_stopped_all(stopped: &[String], all_namespaces: bool) -> String {
    let mut out = String::new();
    if stopped.is_empty() {
        if all_namespaces {
            writeln!(&mut out, "No sandboxes were running.").unwrap();
        } else {
            writeln!(&mut out, "No sandboxes were running for this project.").unwrap();
            writeln!(&mut out, "Use -a to stop sandboxes from all projects.").unwrap();
        }
        return out;
    }

    for name in stopped {
        writeln!(&mut out, "  {} {}", "Stopped:".dimmed(), name).unwrap();
    }
    writeln!(&mut out, "{} All sandboxes stopped.", "✓".green()).unwrap();
    out
}

pub async fn run(name: &str) -> Result<()> {
    let manager = manager()?;
    let was_running = manager.stop(name).await;
    print!("{}", format_stopped(name, was_running));
    Ok(())
}

pub async fn run_all(all_namespaces: bool) -> Result<()> {
    let manager = manager()?;
    let stopped = manager.stop_all(all_namespaces).await?;
    print!("{}", format_stopped_all(&stopped, all_namespaces));
    Ok(())
}
