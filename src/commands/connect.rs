//! Attach a shell to a sandbox, starting it first if needed.

use anyhow::{Context, Result};
use colored::Colorize;
use std::io::{self, BufRead, IsTerminal, Write};

use super::{format_started, manager, ConsoleProgress};

/// Interpret an answer to a `[Y/n]` prompt.
pub fn parse_confirmation(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "" | "y" | "yes"
    )
}

/// Ask before starting. Non-interactive stdin counts as yes.
fn confirm(question: &str) -> Result<bool> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(true);
    }

    print!("{question} [Y/n] ");
    io::stdout().flush().context("Failed to flush stdout")?;
    let mut answer = String::new();
    stdin
        .lock()
        .read_line(&mut answer)
        .context("Failed to read answer")?;
    Ok(parse_confirmation(&answer))
}

/// Display name of a shell (`/usr/bin/zsh` -> `zsh`).
pub fn shell_name(shell: &str) -> &str {
    shell.rsplit('/').next().unwrap_or(shell)
}

pub async fn run(
    name: Option<&str>,
    shell: Option<&str>,
    branch: Option<&str>,
    yes: bool,
) -> Result<()> {
    let manager = manager()?;
    let name = match name {
        Some(name) => name.to_string(),
        None => {
            let name = manager.generate_name();
            println!("Generated sandbox name: {}", name.cyan());
            name
        }
    };

    if !manager.is_running(&name).await? {
        if !yes && !confirm(&format!("Sandbox '{name}' is not running. Start it?"))? {
            return Ok(());
        }
        let info = manager.start(&name, branch, &ConsoleProgress).await?;
        println!("{}", format_started(&info));
    }

    let shell = manager.shell(shell);
    println!(
        "Connecting to sandbox '{}' with {}...",
        name,
        shell_name(shell)
    );
    match manager.connect(&name, Some(shell)).await? {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_confirmation() {
        assert!(parse_confirmation("\n"));
        assert!(parse_confirmation("y\n"));
        assert!(parse_confirmation(" YES "));
        assert!(!parse_confirmation("n\n"));
        assert!(!parse_confirmation("nope"));
    }

    #[test]
    fn test_shell_name() {
        assert_eq!(shell_name("/bin/bash"), "bash");
        assert_eq!(shell_name("fish"), "fish");
    }
}
