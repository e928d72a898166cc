//! [`VersionControl`] backed by the `git` binary.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    default_branch, sandbox_branch, MergeOutcome, VersionControl, DETACHED, GIT_SERVER_DIR,
    REPO_ORIGIN, SANDBOXES_DIR,
};
use crate::sandbox::naming::sanitize;

/// Agent instructions file copied into new clones.
const AGENTS_FILE: &str = "AGENTS.md";

/// `git status --porcelain` codes for unmerged paths.
const UNMERGED_CODES: &[&str] = &["DD", "AU", "UD", "UA", "DU", "AA", "UU"];

/// Settings applied to every new sandbox clone.
#[derive(Debug, Clone, Default)]
pub(crate) struct GitOptions {
    /// `user.name` for commits made in the sandbox.
    pub user_name: Option<String>,
    /// `user.email` for commits made in the sandbox.
    pub user_email: Option<String>,
    /// File copied to the clone root as `AGENTS.md` when the clone has none.
    pub agents_file: Option<PathBuf>,
}

/// Git server for one project.
#[derive(Debug, Clone)]
pub(crate) struct GitServer {
    root: PathBuf,
    options: GitOptions,
}

impl GitServer {
    pub fn new(root: impl Into<PathBuf>, options: GitOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    /// Add the sandbox directories to the host repository's exclude file.
    async fn exclude_sandbox_dirs(&self) -> Result<()> {
        let exclude = git_checked(
            &self.root,
            &["rev-parse", "--git-path", "info/exclude"],
            "locate info/exclude",
        )
        .await?;
        let exclude = self.root.join(exclude);

        let existing = match tokio::fs::read_to_string(&exclude).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", exclude.display()))
            }
        };

        let missing: Vec<String> = [GIT_SERVER_DIR, SANDBOXES_DIR]
            .iter()
            .map(|dir| format!("{dir}/"))
            .filter(|pattern| !existing.lines().any(|line| line.trim() == pattern))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        for pattern in missing {
            content.push_str(&pattern);
            content.push('\n');
        }

        if let Some(parent) = exclude.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&exclude, content)
            .await
            .with_context(|| format!("Failed to write {}", exclude.display()))?;
        debug!("Updated {}", exclude.display());
        Ok(())
    }

    /// Put a fresh clone on `branch` and point it at the container-side origin.
    async fn prepare_clone(&self, clone: &Path, branch: &str) -> Result<()> {
        if ref_exists(clone, &format!("refs/heads/{branch}")).await {
            git_checked(clone, &["checkout", branch], "check out branch").await?;
        } else if ref_exists(clone, &format!("refs/remotes/origin/{branch}")).await {
            git_checked(
                clone,
                &["checkout", "-b", branch, "--track", &format!("origin/{branch}")],
                "check out branch",
            )
            .await?;
        } else {
            git_checked(clone, &["checkout", "-b", branch], "create branch").await?;
        }

        git_checked(
            clone,
            &["remote", "set-url", "origin", REPO_ORIGIN],
            "set origin",
        )
        .await?;

        if let Some(name) = &self.options.user_name {
            git_checked(clone, &["config", "user.name", name], "set user.name").await?;
        }
        if let Some(email) = &self.options.user_email {
            git_checked(clone, &["config", "user.email", email], "set user.email").await?;
        }

        if let Some(source) = &self.options.agents_file {
            let target = clone.join(AGENTS_FILE);
            if source.is_file() && !target.exists() {
                tokio::fs::copy(source, &target)
                    .await
                    .with_context(|| format!("Failed to copy {}", source.display()))?;
                debug!("Copied {} into {}", source.display(), clone.display());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VersionControl for GitServer {
    fn git_server_path(&self) -> PathBuf {
        self.root.join(GIT_SERVER_DIR)
    }

    fn sandbox_path(&self, name: &str) -> PathBuf {
        self.root.join(SANDBOXES_DIR).join(sanitize(name))
    }

    async fn ensure_git_server(&self) -> Result<PathBuf> {
        let bare = self.git_server_path();

        if let Err(e) = self.exclude_sandbox_dirs().await {
            warn!("Could not update git excludes: {e:#}");
        }

        if bare.exists() {
            return Ok(bare);
        }

        info!("Creating git server at {}", bare.display());
        git_checked(
            &self.root,
            &["clone", "--bare", path_str(&self.root)?, path_str(&bare)?],
            "create git server",
        )
        .await?;
        Ok(bare)
    }

    async fn sync_to_git_server(&self) {
        let bare = self.git_server_path();
        let Ok(bare) = path_str(&bare) else {
            warn!("Git server path is not valid UTF-8");
            return;
        };
        match git(&self.root, &["push", "--all", bare]).await {
            Ok(output) if output.status.success() => debug!("Pushed host branches to git server"),
            Ok(output) => warn!(
                "Could not sync branches to git server: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("Could not sync branches to git server: {e:#}"),
        }
    }

    async fn create_sandbox(&self, name: &str, branch: Option<&str>) -> Result<PathBuf> {
        let clone = self.sandbox_path(name);
        if clone.exists() {
            debug!("Workspace {} already exists", clone.display());
            return Ok(clone);
        }

        let bare = self.ensure_git_server().await?;
        self.sync_to_git_server().await;

        let sandboxes = self.root.join(SANDBOXES_DIR);
        tokio::fs::create_dir_all(&sandboxes)
            .await
            .with_context(|| format!("Failed to create {}", sandboxes.display()))?;

        let branch = branch.map_or_else(|| default_branch(name), str::to_string);
        info!("Cloning workspace for {} on {}", name, branch);
        git_checked(
            &self.root,
            &["clone", path_str(&bare)?, path_str(&clone)?],
            "clone sandbox workspace",
        )
        .await?;

        if let Err(e) = self.prepare_clone(&clone, &branch).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&clone).await {
                warn!("Failed to remove partial clone {}: {cleanup}", clone.display());
            }
            return Err(e);
        }
        Ok(clone)
    }

    async fn remove_sandbox(&self, name: &str) -> Result<()> {
        let clone = self.sandbox_path(name);
        if !clone.exists() {
            return Ok(());
        }
        tokio::fs::remove_dir_all(&clone)
            .await
            .with_context(|| format!("Failed to remove {}", clone.display()))?;
        info!("Removed workspace {}", clone.display());
        Ok(())
    }

    async fn get_current_branch(&self, workspace: &Path) -> String {
        match git(workspace, &["branch", "--show-current"]).await {
            Ok(output) if output.status.success() => {
                let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if branch.is_empty() {
                    DETACHED.to_string()
                } else {
                    branch
                }
            }
            _ => DETACHED.to_string(),
        }
    }

    async fn merge_sandbox(&self, name_or_branch: &str) -> MergeOutcome {
        let branch = sandbox_branch(name_or_branch);
        let bare = self.git_server_path();
        let bare = match path_str(&bare) {
            Ok(bare) => bare,
            Err(e) => {
                return MergeOutcome::FetchFailed {
                    branch,
                    message: e.to_string(),
                }
            }
        };

        match git(&self.root, &["fetch", bare, &branch]).await {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                return MergeOutcome::FetchFailed {
                    branch,
                    message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                }
            }
            Err(e) => {
                return MergeOutcome::FetchFailed {
                    branch,
                    message: format!("{e:#}"),
                }
            }
        }

        let message = format!("Merge {branch} from sandbox");
        let output = match git(
            &self.root,
            &["merge", "--no-ff", "-m", &message, "FETCH_HEAD"],
        )
        .await
        {
            Ok(output) => output,
            Err(e) => {
                return MergeOutcome::Failed {
                    branch,
                    message: format!("{e:#}"),
                }
            }
        };

        if output.status.success() {
            info!("Merged {}", branch);
            return MergeOutcome::Merged { branch };
        }

        let paths = unmerged_paths(&self.root).await;
        if paths.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            MergeOutcome::Failed {
                branch,
                message: if stderr.is_empty() { stdout } else { stderr },
            }
        } else {
            MergeOutcome::Conflict { branch, paths }
        }
    }
}

/// Borrow a path as UTF-8 for use as a git argument.
fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))
}

/// Run git in `cwd` and capture its output.
async fn git(cwd: &Path, args: &[&str]) -> Result<Output> {
    debug!("git {} (in {})", shell_words::join(args), cwd.display());
    Command::new("git")
        .current_dir(cwd)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .context("Failed to run git. Is it installed?")
}

/// Run git and fail with its stderr unless it succeeds. Returns trimmed stdout.
async fn git_checked(cwd: &Path, args: &[&str], action: &str) -> Result<String> {
    let output = git(cwd, args).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("Failed to {action}: {}", stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn ref_exists(repo: &Path, reference: &str) -> bool {
    git(repo, &["rev-parse", "--verify", "--quiet", reference])
        .await
        .is_ok_and(|output| output.status.success())
}

/// Paths left unmerged by a stopped merge.
async fn unmerged_paths(repo: &Path) -> Vec<String> {
    let Ok(output) = git(repo, &["status", "--porcelain"]).await else {
        return Vec::new();
    };
    parse_unmerged(&String::from_utf8_lossy(&output.stdout))
}

fn parse_unmerged(porcelain: &str) -> Vec<String> {
    porcelain
        .lines()
        .filter_map(|line| {
            let (code, path) = (line.get(..2)?, line.get(3..)?);
            UNMERGED_CODES.contains(&code).then(|| path.to_string())
        })
        .collect()
}
