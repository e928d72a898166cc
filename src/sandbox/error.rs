//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

use std::path::PathBuf;

/// Errors raised while driving sandbox containers.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SandboxError {
    /// Docker daemon is not running or not accessible.
    #[error("Docker is not available: {message}")]
    DockerUnavailable { message: String },

    /// Image build from the project's Dockerfile failed.
    ///
    /// `output` holds the tail of the build log.
    #[error("Failed to build image {image}: {message}\n{output}")]
    BuildFailed {
        image: String,
        message: String,
        output: String,
    },

    /// The configured base image could not be resolved or pulled.
    #[error("Image {image} is not available: {message}")]
    ImageUnavailable { image: String, message: String },

    /// The build descriptor names neither a Dockerfile nor an image.
    #[error("No Dockerfile or image specified in devcontainer.json")]
    NoImageConfigured,

    /// Container operation failed (create, start, restart, exec, etc.).
    #[error("Container operation failed on {container}: {message}")]
    ContainerFailed { container: String, message: String },

    /// The requested shell does not exist inside the container.
    #[error(
        "Shell '{shell}' is not available in sandbox '{sandbox}'.\n\
         To fix this:\n  \
         1. Add '{shell}' to the sandbox Dockerfile\n  \
         2. Remove the sandbox: agent-sandbox rm {sandbox}\n  \
         3. Recreate it: agent-sandbox connect {sandbox}"
    )]
    ShellUnavailable { shell: String, sandbox: String },

    /// Shifting the exposed ports by the allocated offset left the valid range.
    #[error("No free host ports: port {port} + offset {offset} exceeds 65535")]
    PortRangeExhausted { port: u16, offset: u16 },
}

impl SandboxError {
    /// Creates a `DockerUnavailable` error.
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    /// Creates a `BuildFailed` error from the retained build log lines.
    pub fn build_failed(
        image: impl Into<String>,
        message: impl Into<String>,
        tail: impl IntoIterator<Item = String>,
    ) -> Self {
        Self::BuildFailed {
            image: image.into(),
            message: message.into(),
            output: tail.into_iter().collect::<Vec<_>>().join("\n"),
        }
    }

    /// Creates an `ImageUnavailable` error.
    pub fn image_unavailable(image: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ImageUnavailable {
            image: image.into(),
            message: message.into(),
        }
    }

    /// Creates a `ContainerFailed` error.
    pub fn container_failed(container: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContainerFailed {
            container: container.into(),
            message: message.into(),
        }
    }

    /// Creates a `ShellUnavailable` error.
    pub fn shell_unavailable(shell: impl Into<String>, sandbox: impl Into<String>) -> Self {
        Self::ShellUnavailable {
            shell: shell.into(),
            sandbox: sandbox.into(),
        }
    }
}

/// Errors raised while locating or reading project configuration.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    /// No devcontainer.json was found from the start path upward.
    #[error("Could not find devcontainer.json in {} or parent directories", start.display())]
    DescriptorNotFound { start: PathBuf },

    /// The descriptor exists but is not valid JSON after comment stripping.
    #[error("Invalid devcontainer.json at {}: {message}", path.display())]
    InvalidDescriptor { path: PathBuf, message: String },
}
