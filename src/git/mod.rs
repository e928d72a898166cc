//! Per-project git server and sandbox clones.
//!
//! A bare repository at `<root>/.git-server` relays commits between the
//! host working tree and each sandbox clone under `<root>/.sandboxes/`.
//! Containers see the bare repository at [`REPO_ORIGIN`] and push their
//! branches there; the host merges them back with [`VersionControl::merge_sandbox`].

mod server;

#[cfg(test)]
pub(crate) mod mock;

pub(crate) use server::{GitOptions, GitServer};

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;

/// Bare repository directory under the project root.
pub(crate) const GIT_SERVER_DIR: &str = ".git-server";

/// Directory holding sandbox clones under the project root.
pub(crate) const SANDBOXES_DIR: &str = ".sandboxes";

/// Mount point of the bare repository inside containers.
pub(crate) const REPO_ORIGIN: &str = "/repo-origin";

/// Branch prefix for sandbox branches.
pub(crate) const BRANCH_PREFIX: &str = "sandbox/";

/// Reported branch when a clone is not on any branch.
pub(crate) const DETACHED: &str = "detached";

/// Default branch for a sandbox.
pub(crate) fn default_branch(name: &str) -> String {
    format!("{BRANCH_PREFIX}{name}")
}

/// Normalize a sandbox name or branch to exactly one `sandbox/` prefix.
pub(crate) fn sandbox_branch(name_or_branch: &str) -> String {
    let mut name = name_or_branch;
    while let Some(rest) = name.strip_prefix(BRANCH_PREFIX) {
        name = rest;
    }
    default_branch(name)
}

/// Result of merging a sandbox branch into the host branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MergeOutcome {
    /// The branch was merged.
    Merged { branch: String },
    /// The branch could not be fetched from the git server.
    FetchFailed { branch: String, message: String },
    /// The merge stopped on conflicts, which are left for the user.
    Conflict { branch: String, paths: Vec<String> },
    /// The merge failed for another reason (dirty tree, no repository...).
    Failed { branch: String, message: String },
}

impl MergeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Merged { branch } => write!(f, "Merged {branch} into the current branch"),
            Self::FetchFailed { branch, message } => write!(
                f,
                "Could not fetch {branch} from the git server. \
                 Has the sandbox pushed it (git push origin {branch})?\n{message}"
            ),
            Self::Conflict { branch, paths } => {
                write!(f, "Merge of {branch} stopped on conflicts in:")?;
                for path in paths {
                    write!(f, "\n  {path}")?;
                }
                write!(f, "\nResolve them and commit, or run: git merge --abort")
            }
            Self::Failed { branch, message } => write!(f, "Failed to merge {branch}: {message}"),
        }
    }
}

/// Version control operations behind sandbox workspaces.
///
/// Implementations hold no cached state; every call inspects the
/// filesystem and repositories afresh.
#[async_trait]
pub(crate) trait VersionControl: Send + Sync {
    /// Path of the bare repository.
    fn git_server_path(&self) -> PathBuf;

    /// Workspace path for a sandbox (it may not exist).
    fn sandbox_path(&self, name: &str) -> PathBuf;

    /// Create the bare repository if it does not exist yet.
    async fn ensure_git_server(&self) -> Result<PathBuf>;

    /// Push all host branches to the bare repository. Failures are logged.
    async fn sync_to_git_server(&self);

    /// Clone a workspace for `name` on `branch` (default `sandbox/<name>`).
    ///
    /// An existing workspace is returned as is.
    async fn create_sandbox(&self, name: &str, branch: Option<&str>) -> Result<PathBuf>;

    /// Delete a sandbox workspace. Missing workspaces are not an error.
    async fn remove_sandbox(&self, name: &str) -> Result<()>;

    /// Branch checked out in `workspace`, or [`DETACHED`].
    async fn get_current_branch(&self, workspace: &Path) -> String;

    /// Fetch a sandbox branch from the bare repository and merge it.
    async fn merge_sandbox(&self, name_or_branch: &str) -> MergeOutcome;
}
