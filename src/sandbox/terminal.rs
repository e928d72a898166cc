//! Interactive attach to sandbox containers.
//!
//! Attaching hands the terminal over to `docker` by replacing the current
//! process, so a successful attach never returns.

use anyhow::{anyhow, Error};
#[cfg(not(unix))]
use anyhow::Context;
use std::process::Command;
use tracing::debug;

/// Replaces the current process with an interactive command.
pub(crate) trait Terminal: Send + Sync {
    /// Run `argv` in place of this process.
    ///
    /// Only returns when the replacement could not happen.
    fn replace_process(&self, argv: &[String]) -> Error;
}

/// Terminal backed by `exec(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ProcessTerminal;

impl Terminal for ProcessTerminal {
    fn replace_process(&self, argv: &[String]) -> Error {
        let Some((program, args)) = argv.split_first() else {
            return anyhow!("Cannot exec an empty command");
        };
        debug!("exec {}", shell_words::join(argv));

        let mut command = Command::new(program);
        command.args(args);
        exec(command, program)
    }
}

#[cfg(unix)]
fn exec(mut command: Command, program: &str) -> Error {
    use std::os::unix::process::CommandExt;

    Error::new(command.exec()).context(format!("Failed to exec {program}. Is it installed?"))
}

#[cfg(not(unix))]
fn exec(mut command: Command, program: &str) -> Error {
    match command
        .status()
        .with_context(|| format!("Failed to run {program}. Is it installed?"))
    {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(e) => e,
    }
}

/// Command line for an interactive shell inside a container.
///
/// Init commands run first, chained with `&&`, so the shell only starts when
/// they all succeed.
pub(crate) fn shell_command(
    container: &str,
    workdir: &str,
    shell: &str,
    init: &[String],
) -> Vec<String> {
    let mut argv = vec![
        "docker".to_string(),
        "exec".to_string(),
        "-it".to_string(),
        "-w".to_string(),
        workdir.to_string(),
        container.to_string(),
    ];

    if init.is_empty() {
        argv.push(shell.to_string());
    } else {
        let mut script = init.join(" && ");
        script.push_str(" && exec ");
        script.push_str(&shell_words::quote(shell));
        argv.extend(["sh".to_string(), "-c".to_string(), script]);
    }
    argv
}

/// Command line for streaming a container's logs.
pub(crate) fn logs_command(container: &str, follow: bool) -> Vec<String> {
    let mut argv = vec!["docker".to_string(), "logs".to_string()];
    if follow {
        argv.push("-f".to_string());
    }
    argv.push(container.to_string());
    argv
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command_plain() {
        let argv = shell_command("sandbox-ns-alice", "/workspaces/project", "/bin/bash", &[]);
        assert_eq!(
            argv,
            [
                "docker",
                "exec",
                "-it",
                "-w",
                "/workspaces/project",
                "sandbox-ns-alice",
                "/bin/bash"
            ]
        );
    }

    #[test]
    fn test_shell_command_chains_init() {
        let init = vec!["source .venv/bin/activate".to_string(), "git fetch".to_string()];
        let argv = shell_command("c", "/w", "/usr/bin/fish", &init);
        assert_eq!(&argv[6..8], ["sh", "-c"]);
        assert_eq!(
            argv[8],
            "source .venv/bin/activate && git fetch && exec /usr/bin/fish"
        );
    }

    #[test]
    fn test_logs_command() {
        assert_eq!(logs_command("c", true), ["docker", "logs", "-f", "c"]);
        assert_eq!(logs_command("c", false), ["docker", "logs", "c"]);
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let err = ProcessTerminal.replace_process(&[]);
        assert!(err.to_string().contains("empty command"));
    }

    #[test]
    fn test_missing_program_returns_error() {
        let err = ProcessTerminal
            .replace_process(&["agent-sandbox-test-no-such-binary".to_string()]);
        assert!(err.to_string().contains("agent-sandbox-test-no-such-binary"));
    }
}
