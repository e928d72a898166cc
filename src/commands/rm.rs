//! Remove a sandbox's container and workspace.

use anyhow::Result;
use colored::Colorize;

use super::manager;

pub async fn run(name: &str) -> Result<()> {
    let manager = manager()?;
    manager.remove(name).await;
    println!("{} Sandbox '{}' removed.", "✓".green(), name);
    Ok(())
}
