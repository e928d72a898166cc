//! In-memory container runtime for testing.
//!
//! Tracks containers in a map and records every mutating call so tests can
//! assert on exactly which docker operations an orchestration issued.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::naming::NAMESPACE_LABEL;
use super::{
    ContainerRuntime, ContainerSpec, ContainerState, PortMapping, Progress, SandboxContainer,
    SandboxError,
};

/// A mutating call observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RuntimeCall {
    Build(String),
    EnsureImage(String),
    Create { name: String, image: String },
    Restart(String),
    Stop(String),
    Remove(String),
}

#[derive(Debug, Clone)]
struct MockContainer {
    state: ContainerState,
    ports: PortMapping,
    labels: HashMap<String, String>,
}

/// A mock container runtime.
///
/// Clones share state, so a test can keep a handle after handing a boxed
/// copy to the code under test.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockRuntime {
    containers: Arc<Mutex<HashMap<String, MockContainer>>>,
    calls: Arc<Mutex<Vec<RuntimeCall>>>,
    missing_programs: Arc<Mutex<HashSet<String>>>,
    fail_restart: Arc<AtomicBool>,
    fail_build: Arc<AtomicBool>,
}

impl MockRuntime {
    /// Create an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a container without labels.
    pub fn add_container(&self, name: &str, state: ContainerState, ports: PortMapping) {
        self.add_labeled(name, state, ports, HashMap::new());
    }

    /// Seed a container with labels.
    pub fn add_labeled(
        &self,
        name: &str,
        state: ContainerState,
        ports: PortMapping,
        labels: HashMap<String, String>,
    ) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            MockContainer {
                state,
                ports,
                labels,
            },
        );
    }

    /// Make `restart` fail.
    pub fn fail_restart(&self) {
        self.fail_restart.store(true, Ordering::SeqCst);
    }

    /// Make `build_image` fail.
    pub fn fail_build(&self) {
        self.fail_build.store(true, Ordering::SeqCst);
    }

    /// Report `program` as not executable in every container.
    pub fn without_program(&self, program: &str) {
        self.missing_programs
            .lock()
            .unwrap()
            .insert(program.to_string());
    }

    /// Mutating calls in the order they were made.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Current state of a container.
    pub fn state_of(&self, name: &str) -> ContainerState {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .map_or(ContainerState::NotFound, |c| c.state)
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn set_state(&self, name: &str, state: ContainerState) -> Result<()> {
        match self.containers.lock().unwrap().get_mut(name) {
            Some(container) => {
                container.state = state;
                Ok(())
            }
            None => Err(SandboxError::container_failed(name, "No such container").into()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn state(&self, container: &str) -> Result<ContainerState> {
        Ok(self.state_of(container))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<SandboxContainer>> {
        let containers = self.containers.lock().unwrap();
        let mut listed: Vec<SandboxContainer> = containers
            .iter()
            .filter(|(_, c)| c.state == ContainerState::Running)
            .filter(|(_, c)| {
                namespace.map_or(true, |ns| {
                    c.labels.get(NAMESPACE_LABEL).map(String::as_str) == Some(ns)
                })
            })
            .map(|(name, c)| SandboxContainer {
                name: name.clone(),
                labels: c.labels.clone(),
            })
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn ports(&self, container: &str) -> Result<PortMapping> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(container)
            .map(|c| c.ports.clone())
            .unwrap_or_default())
    }

    async fn build_image(
        &self,
        tag: &str,
        _context: &Path,
        _dockerfile: &Path,
        progress: &dyn Progress,
    ) -> Result<()> {
        self.record(RuntimeCall::Build(tag.to_string()));
        progress.build_output("Step 1/1 : FROM alpine");
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(SandboxError::build_failed(
                tag,
                "The command '/bin/sh -c false' returned a non-zero code: 1",
                vec!["Step 1/1 : RUN false".to_string()],
            )
            .into());
        }
        Ok(())
    }

    async fn ensure_image(&self, image: &str, _progress: &dyn Progress) -> Result<()> {
        self.record(RuntimeCall::EnsureImage(image.to_string()));
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec, image: &str) -> Result<()> {
        self.record(RuntimeCall::Create {
            name: spec.name.clone(),
            image: image.to_string(),
        });
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&spec.name) {
            return Err(SandboxError::container_failed(&spec.name, "Conflict: name in use").into());
        }
        containers.insert(
            spec.name.clone(),
            MockContainer {
                state: ContainerState::Running,
                ports: spec.ports.clone(),
                labels: spec.labels.clone(),
            },
        );
        Ok(())
    }

    async fn restart(&self, container: &str) -> Result<()> {
        self.record(RuntimeCall::Restart(container.to_string()));
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(SandboxError::container_failed(container, "mount source missing").into());
        }
        self.set_state(container, ContainerState::Running)
    }

    async fn stop(&self, container: &str) -> Result<()> {
        self.record(RuntimeCall::Stop(container.to_string()));
        self.set_state(container, ContainerState::Stopped)
    }

    async fn remove(&self, container: &str) -> Result<()> {
        self.record(RuntimeCall::Remove(container.to_string()));
        self.containers.lock().unwrap().remove(container);
        Ok(())
    }

    async fn has_executable(&self, _container: &str, program: &str) -> Result<bool> {
        Ok(!self.missing_programs.lock().unwrap().contains(program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::naming;

    #[tokio::test]
    async fn test_mock_list_filters_namespace_and_state() {
        let runtime = MockRuntime::new();
        let ws = Path::new("/ws");
        runtime.add_labeled(
            "a",
            ContainerState::Running,
            PortMapping::new(),
            naming::labels("ns1", "a", ws),
        );
        runtime.add_labeled(
            "b",
            ContainerState::Running,
            PortMapping::new(),
            naming::labels("ns2", "b", ws),
        );
        runtime.add_labeled(
            "c",
            ContainerState::Stopped,
            PortMapping::new(),
            naming::labels("ns1", "c", ws),
        );

        let ns1 = runtime.list(Some("ns1")).await.unwrap();
        assert_eq!(ns1.len(), 1);
        assert_eq!(ns1[0].name, "a");

        let all = runtime.list(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_ports_missing_container_is_empty() {
        let runtime = MockRuntime::new();
        assert!(runtime.ports("nope").await.unwrap().is_empty());
    }

    #[test]
    fn test_mock_runtime_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MockRuntime>();
    }
}
