use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::{HostConfig, PortBinding, PortMap};
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::{debug, info};

use super::naming::{MANAGED_LABEL, NAMESPACE_LABEL};
use super::ports::parse_port_map;
use super::{
    ContainerRuntime, ContainerSpec, ContainerState, PortMapping, Progress, SandboxContainer,
    SandboxError,
};

/// Build log lines kept for error reports.
const BUILD_TAIL_LINES: usize = 20;

/// Seconds docker waits before killing a stopping container.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Top-level directories never sent to the docker daemon as build context.
const CONTEXT_EXCLUDES: &[&str] = &[".git-server", ".sandboxes"];

/// Archive name for a Dockerfile that lives outside the build context.
const EXTERNAL_DOCKERFILE: &str = ".agent-sandbox.Dockerfile";

/// Container runtime backed by the local docker daemon.
pub(crate) struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the standard docker environment (`DOCKER_HOST` or the
    /// default socket). No request is made until the first operation.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::docker_unavailable(e.to_string()))?;
        Ok(Self { docker })
    }
}

/// A 404 from the daemon.
fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Map a daemon error for `container` onto the domain error.
///
/// Responses from the daemon are container failures; anything else means the
/// daemon itself could not be reached.
fn container_error(container: &str, err: DockerError) -> SandboxError {
    match err {
        DockerError::DockerResponseServerError { message, .. } => {
            SandboxError::container_failed(container, message)
        }
        other => SandboxError::docker_unavailable(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn state(&self, container: &str) -> Result<ContainerState> {
        match self.docker.inspect_container(container, None).await {
            Ok(details) => {
                let running = details
                    .state
                    .and_then(|s| s.running)
                    .unwrap_or(false);
                Ok(if running {
                    ContainerState::Running
                } else {
                    ContainerState::Stopped
                })
            }
            Err(e) if is_not_found(&e) => Ok(ContainerState::NotFound),
            Err(e) => Err(container_error(container, e).into()),
        }
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<SandboxContainer>> {
        let mut label_filters = vec![format!("{MANAGED_LABEL}=true")];
        if let Some(ns) = namespace {
            label_filters.push(format!("{NAMESPACE_LABEL}={ns}"));
        }
        let filters = HashMap::from([("label".to_string(), label_filters)]);

        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| SandboxError::docker_unavailable(e.to_string()))?;

        let mut containers: Vec<SandboxContainer> = summaries
            .into_iter()
            .filter_map(|summary| {
                let name = summary
                    .names
                    .as_ref()
                    .and_then(|names| names.first())?
                    .trim_start_matches('/')
                    .to_string();
                Some(SandboxContainer {
                    name,
                    labels: summary.labels.unwrap_or_default(),
                })
            })
            .collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    async fn ports(&self, container: &str) -> Result<PortMapping> {
        match self.docker.inspect_container(container, None).await {
            Ok(details) => Ok(details
                .network_settings
                .and_then(|settings| settings.ports)
                .map(|ports| parse_port_map(&ports))
                .unwrap_or_default()),
            Err(e) if is_not_found(&e) => Ok(PortMapping::new()),
            Err(e) => Err(container_error(container, e).into()),
        }
    }

    async fn build_image(
        &self,
        tag: &str,
        context: &Path,
        dockerfile: &Path,
        progress: &dyn Progress,
    ) -> Result<()> {
        info!("Building image {} from {}", tag, dockerfile.display());

        let (tar_bytes, dockerfile_name) = context_archive(context, dockerfile)?;
        let options = BuildImageOptions {
            dockerfile: dockerfile_name,
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(tar_bytes));
        let mut tail: VecDeque<String> = VecDeque::with_capacity(BUILD_TAIL_LINES);

        while let Some(chunk) = stream.next().await {
            let output = match chunk {
                Ok(output) => output,
                Err(DockerError::DockerResponseServerError { message, .. }) => {
                    return Err(SandboxError::build_failed(tag, message, tail).into());
                }
                Err(DockerError::DockerStreamError { error }) => {
                    return Err(SandboxError::build_failed(tag, error, tail).into());
                }
                Err(e) => return Err(SandboxError::docker_unavailable(e.to_string()).into()),
            };

            if let Some(text) = &output.stream {
                for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
                    progress.build_output(line);
                    if tail.len() == BUILD_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_string());
                }
            }

            let error = output
                .error
                .or_else(|| output.error_detail.and_then(|detail| detail.message));
            if let Some(message) = error {
                return Err(SandboxError::build_failed(tag, message, tail).into());
            }
        }

        info!("Image built: {}", tag);
        Ok(())
    }

    async fn ensure_image(&self, image: &str, progress: &dyn Progress) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("Image {} present locally", image);
            return Ok(());
        }

        progress.step(&format!("Pulling {image}..."));
        let (from_image, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(SandboxError::image_unavailable(image, error).into());
                    }
                    if let Some(status) = info.status {
                        debug!("pull {}: {}", image, status.trim());
                    }
                }
                Err(DockerError::DockerResponseServerError { message, .. }) => {
                    return Err(SandboxError::image_unavailable(image, message).into());
                }
                Err(e) => return Err(SandboxError::image_unavailable(image, e.to_string()).into()),
            }
        }

        info!("Pulled image {}", image);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec, image: &str) -> Result<()> {
        let (exposed_ports, port_bindings) = port_bindings(&spec.ports);
        let config = ContainerConfig {
            image: Some(image.to_string()),
            working_dir: Some(spec.workdir.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                binds: Some(spec.mounts.iter().map(|m| m.to_bind()).collect()),
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        debug!("Creating container {} from {}", spec.name, image);
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| container_error(&spec.name, e))?;

        self.docker
            .start_container::<String>(&spec.name, None)
            .await
            .map_err(|e| container_error(&spec.name, e))?;
        Ok(())
    }

    async fn restart(&self, container: &str) -> Result<()> {
        self.docker
            .start_container::<String>(container, None)
            .await
            .map_err(|e| container_error(container, e))?;
        Ok(())
    }

    async fn stop(&self, container: &str) -> Result<()> {
        match self
            .docker
            .stop_container(
                container,
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(container_error(container, e).into()),
        }
    }

    async fn remove(&self, container: &str) -> Result<()> {
        match self
            .docker
            .remove_container(
                container,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(container_error(container, e).into()),
        }
    }

    async fn has_executable(&self, container: &str, program: &str) -> Result<bool> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        executable_check(program),
                    ]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| container_error(container, e))?;

        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| container_error(container, e))?
        {
            while output.next().await.is_some() {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| container_error(container, e))?;
        debug!(
            "{} in {}: exit code {:?}",
            program, container, inspect.exit_code
        );
        Ok(inspect.exit_code == Some(0))
    }
}

/// Shell snippet that exits 0 when `program` can be run.
///
/// Paths are tested directly; bare names go through `PATH`.
fn executable_check(program: &str) -> String {
    let quoted = shell_words::quote(program);
    if program.contains('/') {
        format!("test -x {quoted}")
    } else {
        format!("command -v {quoted} >/dev/null 2>&1")
    }
}

/// Exposed ports and host bindings for a port mapping.
fn port_bindings(ports: &PortMapping) -> (HashMap<String, HashMap<(), ()>>, PortMap) {
    let mut exposed = HashMap::new();
    let mut bindings = PortMap::new();
    for (container_port, host_port) in ports {
        let key = format!("{container_port}/tcp");
        exposed.insert(key.clone(), HashMap::new());
        bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(host_port.to_string()),
            }]),
        );
    }
    (exposed, bindings)
}

/// Split an image reference into the `fromImage` and `tag` pull parameters.
///
/// Digest references are passed through whole. A missing tag means `latest`,
/// since an empty tag would pull every tag of the repository.
fn split_image_reference(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(colon) => {
            let split = name_start + colon;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}

/// Pack a build context into a tar archive for the daemon.
///
/// Returns the archive and the Dockerfile's name inside it. A Dockerfile
/// outside the context is added under [`EXTERNAL_DOCKERFILE`].
fn context_archive(context: &Path, dockerfile: &Path) -> Result<(Bytes, String)> {
    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);

    append_tree(&mut builder, context, Path::new(""))
        .with_context(|| format!("Failed to archive build context {}", context.display()))?;

    let dockerfile_name = match dockerfile.strip_prefix(context) {
        Ok(relative) => relative.to_string_lossy().into_owned(),
        Err(_) => {
            builder
                .append_path_with_name(dockerfile, EXTERNAL_DOCKERFILE)
                .with_context(|| format!("Failed to read {}", dockerfile.display()))?;
            EXTERNAL_DOCKERFILE.to_string()
        }
    };

    let buf = builder
        .into_inner()
        .context("Failed to finalize build context")?;
    Ok((Bytes::from(buf), dockerfile_name))
}

fn append_tree(builder: &mut Builder<Vec<u8>>, dir: &Path, prefix: &Path) -> Result<()> {
    let mut entries: Vec<(PathBuf, fs::FileType)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        entries.push((entry.path(), entry.file_type()?));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (path, file_type) in entries {
        let Some(name) = path.file_name() else {
            continue;
        };
        if prefix.as_os_str().is_empty()
            && CONTEXT_EXCLUDES.iter().any(|excluded| name == *excluded)
        {
            continue;
        }

        let archived = prefix.join(name);
        if file_type.is_dir() {
            builder.append_dir(&archived, &path)?;
            append_tree(builder, &path, &archived)?;
        } else {
            builder.append_path_with_name(&path, &archived)?;
        }
    }
    Ok(())
}
