//! Merge a sandbox branch into the current host branch.

use anyhow::Result;
use colored::Colorize;
use std::process::ExitCode;

use super::manager;
use crate::git::MergeOutcome;

pub fn format_outcome(outcome: &MergeOutcome) -> String {
    let message = outcome.to_string();
    if outcome.is_success() {
        format!("{} {}\n", "✓".green(), message.green())
    } else {
        format!("{} {}\n", "✗".red(), message.yellow())
    }
}

/// Fails the process (exit 1) when the merge does not complete.
pub async fn run(name: &str) -> Result<ExitCode> {
    let manager = manager()?;
    let outcome = manager.merge(name).await;
    print!("{}", format_outcome(&outcome));
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_outcome() {
        colored::control::set_override(false);
        let merged = MergeOutcome::Merged {
            branch: "sandbox/alice".to_string(),
        };
        assert_eq!(
            format_outcome(&merged),
            "✓ Merged sandbox/alice into the current branch\n"
        );

        let failed = MergeOutcome::Failed {
            branch: "sandbox/alice".to_string(),
            message: "Your local changes would be overwritten".to_string(),
        };
        assert!(format_outcome(&failed).starts_with("✗ Failed to merge sandbox/alice"));
    }
}
