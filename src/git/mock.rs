//! In-memory version control for testing.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{default_branch, sandbox_branch, MergeOutcome, VersionControl, GIT_SERVER_DIR, SANDBOXES_DIR};
use crate::sandbox::naming::sanitize;

#[derive(Debug, Default)]
struct State {
    /// Workspace path to checked-out branch.
    workspaces: HashMap<PathBuf, String>,
    pushed: HashSet<String>,
    branch_queries: Vec<PathBuf>,
    clones: usize,
    server_checks: usize,
}

/// Mock version control tracking workspaces in memory.
///
/// Workspaces are only created on disk when the root exists, so tests can
/// check the filesystem as well.
#[derive(Debug, Clone)]
pub(crate) struct MockVcs {
    root: PathBuf,
    state: Arc<Mutex<State>>,
}

impl MockVcs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Arc::default(),
        }
    }

    /// Mark a sandbox branch as pushed to the git server.
    pub fn push(&self, branch: &str) {
        self.state.lock().unwrap().pushed.insert(branch.to_string());
    }

    /// Workspaces passed to `get_current_branch`.
    pub fn branch_queries(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().branch_queries.clone()
    }

    /// Number of `ensure_git_server` calls.
    pub fn server_checks(&self) -> usize {
        self.state.lock().unwrap().server_checks
    }

    /// Number of clones performed.
    pub fn clones(&self) -> usize {
        self.state.lock().unwrap().clones
    }

    /// Forget a workspace without going through `remove_sandbox`.
    pub fn delete_workspace(&self, name: &str) {
        let path = self.sandbox_path(name);
        self.state.lock().unwrap().workspaces.remove(&path);
        if path.exists() {
            std::fs::remove_dir_all(&path).unwrap();
        }
    }
}

#[async_trait]
impl VersionControl for MockVcs {
    fn git_server_path(&self) -> PathBuf {
        self.root.join(GIT_SERVER_DIR)
    }

    fn sandbox_path(&self, name: &str) -> PathBuf {
        self.root.join(SANDBOXES_DIR).join(sanitize(name))
    }

    async fn ensure_git_server(&self) -> Result<PathBuf> {
        self.state.lock().unwrap().server_checks += 1;
        Ok(self.git_server_path())
    }

    async fn sync_to_git_server(&self) {}

    async fn create_sandbox(&self, name: &str, branch: Option<&str>) -> Result<PathBuf> {
        let path = self.sandbox_path(name);
        let mut state = self.state.lock().unwrap();
        if !state.workspaces.contains_key(&path) {
            state.clones += 1;
            let branch = branch.map_or_else(|| default_branch(name), str::to_string);
            state.workspaces.insert(path.clone(), branch);
            if self.root.exists() {
                std::fs::create_dir_all(&path)?;
            }
        }
        Ok(path)
    }

    async fn remove_sandbox(&self, name: &str) -> Result<()> {
        let path = self.sandbox_path(name);
        self.state.lock().unwrap().workspaces.remove(&path);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        Ok(())
    }

    async fn get_current_branch(&self, workspace: &Path) -> String {
        let mut state = self.state.lock().unwrap();
        state.branch_queries.push(workspace.to_path_buf());
        state
            .workspaces
            .get(workspace)
            .cloned()
            .unwrap_or_else(|| super::DETACHED.to_string())
    }

    async fn merge_sandbox(&self, name_or_branch: &str) -> MergeOutcome {
        let branch = sandbox_branch(name_or_branch);
        if self.state.lock().unwrap().pushed.contains(&branch) {
            MergeOutcome::Merged { branch }
        } else {
            MergeOutcome::FetchFailed {
                branch,
                message: "couldn't find remote ref".to_string(),
            }
        }
    }
}
