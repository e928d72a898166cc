//! Sandbox container state machine.
//!
//! `NotFound` builds (or resolves) the image and creates the container,
//! `Stopped` restarts it in place, and `Running` is left alone. Stop and
//! remove are best-effort and never fail the caller.

use anyhow::Result;
use tracing::{debug, info, warn};

use super::{ContainerRuntime, ContainerSpec, ContainerState, ImageSource, Progress, SandboxError};

/// Bring the container described by `spec` to `Running`.
///
/// Returns the state the container was found in.
pub(crate) async fn ensure_running(
    runtime: &dyn ContainerRuntime,
    spec: &ContainerSpec,
    progress: &dyn Progress,
) -> Result<ContainerState> {
    let state = runtime.state(&spec.name).await?;
    debug!("Container {} is {}", spec.name, state);

    match state {
        ContainerState::Running => return Ok(state),
        ContainerState::Stopped => {
            progress.step("Restarting stopped container...");
            match runtime.restart(&spec.name).await {
                Ok(()) => {
                    info!("Restarted container {}", spec.name);
                    return Ok(state);
                }
                Err(e) => {
                    warn!("Restarting {} failed, recreating it: {e:#}", spec.name);
                    remove(runtime, &spec.name).await;
                }
            }
        }
        ContainerState::NotFound => {}
    }

    let image = resolve_image(runtime, spec, progress).await?;

    progress.step("Starting container...");
    runtime.create(spec, &image).await?;
    info!("Created container {} from {}", spec.name, image);
    Ok(state)
}

/// Build or locate the image a new container runs.
async fn resolve_image(
    runtime: &dyn ContainerRuntime,
    spec: &ContainerSpec,
    progress: &dyn Progress,
) -> Result<String> {
    match &spec.source {
        Some(ImageSource::Build {
            context,
            dockerfile,
        }) => {
            progress.step("Building container image...");
            runtime
                .build_image(&spec.image_tag, context, dockerfile, progress)
                .await?;
            Ok(spec.image_tag.clone())
        }
        Some(ImageSource::Image(image)) => {
            progress.step("Resolving base image...");
            runtime.ensure_image(image, progress).await?;
            Ok(image.clone())
        }
        None => Err(SandboxError::NoImageConfigured.into()),
    }
}

/// Stop a container if it is running.
///
/// Returns true when a stop was issued and succeeded.
pub(crate) async fn stop(runtime: &dyn ContainerRuntime, container: &str) -> bool {
    match runtime.state(container).await {
        Ok(ContainerState::Running) => match runtime.stop(container).await {
            Ok(()) => {
                info!("Stopped container {}", container);
                true
            }
            Err(e) => {
                warn!("Failed to stop {}: {e:#}", container);
                false
            }
        },
        Ok(state) => {
            debug!("Not stopping {}: {}", container, state);
            false
        }
        Err(e) => {
            warn!("Failed to query {}: {e:#}", container);
            false
        }
    }
}

/// Stop (best-effort) and force-delete a container.
pub(crate) async fn remove(runtime: &dyn ContainerRuntime, container: &str) {
    stop(runtime, container).await;
    if let Err(e) = runtime.remove(container).await {
        warn!("Failed to remove {}: {e:#}", container);
    }
}
