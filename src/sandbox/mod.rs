//! Docker sandbox containers.
//!
//! The [`ContainerRuntime`] trait exposes the primitive container operations;
//! [`lifecycle`] drives a sandbox through its states on top of them. The
//! runtime keeps no cache, so every query reflects the daemon's current view.

mod docker;
mod error;
pub(crate) mod lifecycle;
#[cfg(test)]
pub(crate) mod mock;
pub(crate) mod naming;
pub(crate) mod ports;
pub(crate) mod terminal;

pub(crate) use docker::DockerRuntime;
pub(crate) use error::{ConfigError, SandboxError};
pub(crate) use ports::PortMapping;
pub(crate) use terminal::{ProcessTerminal, Terminal};

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Observed state of a sandbox container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContainerState {
    /// No container with that name exists.
    NotFound,
    /// The container exists but is not running.
    Stopped,
    /// The container is running.
    Running,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// A bind mount from the host into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BindMount {
    /// Absolute host path.
    pub source: PathBuf,
    /// Path inside the container.
    pub target: String,
    /// Mount read-only.
    pub readonly: bool,
}

impl BindMount {
    /// Read-write mount.
    pub fn rw(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            readonly: false,
        }
    }

    /// Docker `binds` entry (`source:target[:ro]`).
    pub fn to_bind(&self) -> String {
        let mode = if self.readonly { ":ro" } else { "" };
        format!("{}:{}{mode}", self.source.display(), self.target)
    }
}

/// Where the sandbox image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ImageSource {
    /// Build from a Dockerfile.
    Build {
        /// Build context directory.
        context: PathBuf,
        /// Dockerfile path (absolute).
        dockerfile: PathBuf,
    },
    /// Use a pre-built image.
    Image(String),
}

/// Everything needed to create a sandbox container from scratch.
#[derive(Debug, Clone)]
pub(crate) struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Tag given to a built image.
    pub image_tag: String,
    /// Image to build or use; only needed when creating.
    pub source: Option<ImageSource>,
    /// Working directory inside the container.
    pub workdir: String,
    /// Bind mounts, workspace first.
    pub mounts: Vec<BindMount>,
    /// Container port to host port.
    pub ports: PortMapping,
    /// Identifying labels.
    pub labels: HashMap<String, String>,
}

/// A sandbox container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SandboxContainer {
    /// Container name without the leading `/`.
    pub name: String,
    /// Labels attached at creation.
    pub labels: HashMap<String, String>,
}

impl SandboxContainer {
    /// Sandbox name, from the name label when present.
    pub fn sandbox_name(&self) -> String {
        naming::sandbox_name_from_container(&self.name, &self.labels)
    }

    /// Namespace label, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.labels.get(naming::NAMESPACE_LABEL).map(String::as_str)
    }

    /// Workspace host path label, if any.
    pub fn workspace(&self) -> Option<&Path> {
        self.labels.get(naming::WORKSPACE_LABEL).map(Path::new)
    }
}

/// Receives progress while a sandbox is being brought up.
pub(crate) trait Progress: Send + Sync {
    /// A new step has started.
    fn step(&self, _message: &str) {}

    /// A line of image build output.
    fn build_output(&self, _line: &str) {}
}

/// Progress observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Silent;

impl Progress for Silent {}

/// Primitive container operations.
///
/// Implementations must not cache state between calls.
#[async_trait]
pub(crate) trait ContainerRuntime: Send + Sync {
    /// Current state of the named container.
    async fn state(&self, container: &str) -> Result<ContainerState>;

    /// Running sandbox containers, optionally restricted to one namespace.
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<SandboxContainer>>;

    /// Live port mapping; empty when the container has none or is missing.
    async fn ports(&self, container: &str) -> Result<PortMapping>;

    /// Build an image from a Dockerfile, streaming output to `progress`.
    async fn build_image(
        &self,
        tag: &str,
        context: &Path,
        dockerfile: &Path,
        progress: &dyn Progress,
    ) -> Result<()>;

    /// Make sure an image is available locally, pulling it if needed.
    async fn ensure_image(&self, image: &str, progress: &dyn Progress) -> Result<()>;

    /// Create and start a new container from `image`.
    async fn create(&self, spec: &ContainerSpec, image: &str) -> Result<()>;

    /// Start an existing stopped container in place.
    async fn restart(&self, container: &str) -> Result<()>;

    /// Stop a running container.
    async fn stop(&self, container: &str) -> Result<()>;

    /// Force-delete a container.
    async fn remove(&self, container: &str) -> Result<()>;

    /// Whether `program` is executable inside a running container.
    async fn has_executable(&self, container: &str, program: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_state_display() {
        assert_eq!(ContainerState::NotFound.to_string(), "not found");
        assert_eq!(ContainerState::Stopped.to_string(), "stopped");
        assert_eq!(ContainerState::Running.to_string(), "running");
    }

    #[test]
    fn test_bind_mount_to_bind() {
        let rw = BindMount::rw("/host/ws", "/workspaces/project");
        assert_eq!(rw.to_bind(), "/host/ws:/workspaces/project");

        let ro = BindMount {
            readonly: true,
            ..BindMount::rw("/home/u/.ssh", "/home/dev/.ssh")
        };
        assert_eq!(ro.to_bind(), "/home/u/.ssh:/home/dev/.ssh:ro");
    }

    #[test]
    fn test_sandbox_container_accessors() {
        let container = SandboxContainer {
            name: "sandbox-ns-alice".to_string(),
            labels: naming::labels("ns", "alice", Path::new("/p/.sandboxes/alice")),
        };
        assert_eq!(container.sandbox_name(), "alice");
        assert_eq!(container.namespace(), Some("ns"));
        assert_eq!(
            container.workspace(),
            Some(Path::new("/p/.sandboxes/alice"))
        );
    }
}
