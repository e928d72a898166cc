//! Sandbox lifecycle orchestration.
//!
//! [`SandboxManager`] ties a project's git server to its sandbox containers.
//! It keeps no state of its own: every operation re-reads the filesystem and
//! asks the container runtime for live state, so partial results of an
//! interrupted run are picked up on the next call.

use anyhow::{bail, Result};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Settings, DEFAULT_SHELL};
use crate::devcontainer::{self, Descriptor};
use crate::git::{GitOptions, GitServer, MergeOutcome, VersionControl, REPO_ORIGIN};
use crate::sandbox::{
    lifecycle, naming, ports, terminal, BindMount, ConfigError, ContainerRuntime, ContainerSpec,
    ContainerState, DockerRuntime, PortMapping, ProcessTerminal, Progress, SandboxError, Terminal,
};

/// Branch reported for a container whose workspace is gone.
pub(crate) const ORPHANED: &str = "(orphaned)";

/// Prefix of generated sandbox names.
const GENERATED_PREFIX: &str = "sbx-";

/// A project with a build descriptor.
#[derive(Debug, Clone)]
pub(crate) struct Project {
    /// Directory holding the descriptor (and the git repository).
    pub root: PathBuf,
    /// Namespace derived from `root`.
    pub namespace: String,
    pub descriptor: Descriptor,
    pub settings: Settings,
}

impl Project {
    /// Locate the project at or above `start` and load its configuration.
    pub fn discover(start: &Path) -> Result<Self> {
        let (root, descriptor_path) =
            devcontainer::find_project_root(start).ok_or_else(|| ConfigError::DescriptorNotFound {
                start: start.to_path_buf(),
            })?;
        let descriptor = Descriptor::load(&descriptor_path)?;
        let settings = Settings::load(start)?;
        let namespace = naming::namespace(&root);
        debug!("Project {} (namespace {})", root.display(), namespace);

        Ok(Self {
            root,
            namespace,
            descriptor,
            settings,
        })
    }
}

/// A sandbox as seen by `start` and `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SandboxInfo {
    pub name: String,
    /// Checked-out branch, `detached`, or [`ORPHANED`].
    pub branch: String,
    /// Container port to host port.
    pub ports: PortMapping,
    /// Host path of the workspace clone.
    pub workspace: PathBuf,
    /// Namespace of the owning project, when known.
    pub namespace: Option<String>,
}

/// Orchestrates sandboxes for one project.
pub(crate) struct SandboxManager {
    project: Project,
    runtime: Box<dyn ContainerRuntime>,
    git: Box<dyn VersionControl>,
    terminal: Box<dyn Terminal>,
}

impl SandboxManager {
    /// Discover the project at or above `start` and connect to docker.
    ///
    /// Fails with [`ConfigError`] before touching docker or git when no
    /// descriptor is found.
    pub fn discover(start: &Path) -> Result<Self> {
        let project = Project::discover(start)?;
        let git = GitServer::new(
            &project.root,
            GitOptions {
                user_name: project.settings.git.name.clone(),
                user_email: project.settings.git.email.clone(),
                agents_file: Some(project.descriptor.agents_file()),
            },
        );
        let runtime = DockerRuntime::connect()?;
        Ok(Self::new(
            project,
            Box::new(runtime),
            Box::new(git),
            Box::new(ProcessTerminal),
        ))
    }

    pub fn new(
        project: Project,
        runtime: Box<dyn ContainerRuntime>,
        git: Box<dyn VersionControl>,
        terminal: Box<dyn Terminal>,
    ) -> Self {
        Self {
            project,
            runtime,
            git,
            terminal,
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    fn container_name(&self, name: &str) -> String {
        naming::container_name(&self.project.namespace, name)
    }

    /// Create the workspace if needed and bring the container up.
    ///
    /// A running sandbox is reported as is: neither git nor docker state is
    /// touched, even when its workspace has gone missing.
    pub async fn start(
        &self,
        name: &str,
        branch: Option<&str>,
        progress: &dyn Progress,
    ) -> Result<SandboxInfo> {
        let container = self.container_name(name);

        let workspace = if self.runtime.state(&container).await? == ContainerState::Running {
            debug!("Sandbox {} already running", name);
            self.git.sandbox_path(name)
        } else {
            progress.step("Preparing workspace...");
            self.git.ensure_git_server().await?;
            let workspace = self.git.create_sandbox(name, branch).await?;

            let ports = self.allocate_ports().await?;
            let spec = self.container_spec(name, &workspace, ports);
            lifecycle::ensure_running(self.runtime.as_ref(), &spec, progress).await?;
            info!("Sandbox {} is running", name);
            workspace
        };

        Ok(SandboxInfo {
            name: name.to_string(),
            branch: self.branch_of(&workspace).await,
            ports: self.runtime.ports(&container).await?,
            workspace,
            namespace: Some(self.project.namespace.clone()),
        })
    }

    /// Checked-out branch, or [`ORPHANED`] when the workspace is gone.
    async fn branch_of(&self, workspace: &Path) -> String {
        if workspace.is_dir() {
            self.git.get_current_branch(workspace).await
        } else {
            ORPHANED.to_string()
        }
    }

    /// Host ports for a new container.
    ///
    /// Considers every running sandbox on the host, not only this
    /// namespace, since host ports are shared. The first sandbox of a project
    /// therefore only gets the declared ports unshifted when no other
    /// project has sandboxes running.
    // TODO: two concurrent starts can pick the same offset; hold a lock file
    // next to .git-server from allocation until the container is created.
    async fn allocate_ports(&self) -> Result<PortMapping> {
        let base = &self.project.descriptor.forward_ports;
        if base.is_empty() {
            return Ok(PortMapping::new());
        }

        let mut existing = Vec::new();
        for container in self.runtime.list(None).await? {
            existing.push(self.runtime.ports(&container.name).await?);
        }
        let offset = ports::next_offset(base, &existing);
        debug!("Port offset {} over {} running sandboxes", offset, existing.len());
        Ok(ports::build_mapping(base, offset)?)
    }

    fn container_spec(&self, name: &str, workspace: &Path, ports: PortMapping) -> ContainerSpec {
        let descriptor = &self.project.descriptor;
        let mut mounts = vec![
            BindMount::rw(workspace, descriptor.workspace_folder.clone()),
            BindMount::rw(self.git.git_server_path(), REPO_ORIGIN),
        ];
        mounts.extend(self.project.settings.mounts(&self.project.root));

        ContainerSpec {
            name: self.container_name(name),
            image_tag: naming::image_name(&self.project.namespace, name),
            source: descriptor.image_source.clone(),
            workdir: descriptor.workspace_folder.clone(),
            mounts,
            ports,
            labels: naming::labels(&self.project.namespace, name, workspace),
        }
    }

    pub async fn is_running(&self, name: &str) -> Result<bool> {
        Ok(self.runtime.state(&self.container_name(name)).await? == ContainerState::Running)
    }

    /// Stop a sandbox's container. Returns true if it was running.
    pub async fn stop(&self, name: &str) -> bool {
        lifecycle::stop(self.runtime.as_ref(), &self.container_name(name)).await
    }

    /// Stop every running sandbox in this namespace, or on the host.
    ///
    /// Returns the names that were stopped.
    pub async fn stop_all(&self, all_namespaces: bool) -> Result<Vec<String>> {
        let namespace = (!all_namespaces).then_some(self.project.namespace.as_str());
        let mut stopped = Vec::new();
        for container in self.runtime.list(namespace).await? {
            if lifecycle::stop(self.runtime.as_ref(), &container.name).await {
                stopped.push(container.sandbox_name());
            }
        }
        Ok(stopped)
    }

    /// Delete a sandbox's container and workspace. Best-effort.
    pub async fn remove(&self, name: &str) {
        lifecycle::remove(self.runtime.as_ref(), &self.container_name(name)).await;
        if let Err(e) = self.git.remove_sandbox(name).await {
            warn!("Failed to remove workspace for {}: {e:#}", name);
        }
    }

    /// Running sandboxes in this namespace, or on the host.
    pub async fn list(&self, all_namespaces: bool) -> Result<Vec<SandboxInfo>> {
        let namespace = (!all_namespaces).then_some(self.project.namespace.as_str());
        let mut sandboxes = Vec::new();

        for container in self.runtime.list(namespace).await? {
            let name = container.sandbox_name();
            let workspace = container
                .workspace()
                .map_or_else(|| self.git.sandbox_path(&name), Path::to_path_buf);
            let branch = self.branch_of(&workspace).await;

            sandboxes.push(SandboxInfo {
                ports: self.runtime.ports(&container.name).await?,
                namespace: container.namespace().map(str::to_string),
                name,
                branch,
                workspace,
            });
        }
        Ok(sandboxes)
    }

    pub async fn ports(&self, name: &str) -> Result<PortMapping> {
        self.runtime.ports(&self.container_name(name)).await
    }

    /// The shell to attach with: `requested`, the configured shell, or `/bin/bash`.
    pub fn shell<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .or_else(|| self.project.settings.default_shell())
            .unwrap_or(DEFAULT_SHELL)
    }

    /// Replace this process with an interactive shell in the sandbox.
    ///
    /// `shell` defaults to the configured shell, then `/bin/bash`.
    pub async fn connect(&self, name: &str, shell: Option<&str>) -> Result<Infallible> {
        let shell = self.shell(shell);
        let container = self.container_name(name);

        if !self.is_running(name).await? {
            bail!("Sandbox '{name}' is not running. Start it with: agent-sandbox start {name}");
        }
        if !self.runtime.has_executable(&container, shell).await? {
            return Err(SandboxError::shell_unavailable(shell, name).into());
        }

        info!("Connecting to {} with {}", name, shell);
        let argv = terminal::shell_command(
            &container,
            &self.project.descriptor.workspace_folder,
            shell,
            &self.project.settings.sandbox.shell_init,
        );
        Err(self.terminal.replace_process(&argv))
    }

    /// Replace this process with `docker logs` for the sandbox.
    pub async fn logs(&self, name: &str, follow: bool) -> Result<Infallible> {
        let container = self.container_name(name);
        if self.runtime.state(&container).await? == ContainerState::NotFound {
            bail!("No sandbox named '{name}'");
        }
        Err(self
            .terminal
            .replace_process(&terminal::logs_command(&container, follow)))
    }

    /// Merge a sandbox branch from the git server into the host branch.
    pub async fn merge(&self, name: &str) -> MergeOutcome {
        self.git.merge_sandbox(name).await
    }

    /// A fresh `sbx-xxxxxxxx` name with no workspace yet.
    pub fn generate_name(&self) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string();
            let name = format!("{GENERATED_PREFIX}{}", &id[..8]);
            if !self.git.sandbox_path(&name).exists() {
                return name;
            }
        }
    }
}
