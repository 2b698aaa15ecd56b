//! Iterative Dev Pack (IDP) specification model
//!
//! Typed view of `idp.yaml`: the runtime container, shared build containers
//! and volumes, the task set and the scenarios that order tasks into build
//! cycles. All queries here are pure reads over the loaded document.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Scenario run on a full build
pub const FULL_BUILD_SCENARIO: &str = "full-build";

/// Scenario run on an incremental build
pub const INCREMENTAL_BUILD_SCENARIO: &str = "incremental-build";

/// Parsed IDP document
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Idp {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub metadata: IdpMetadata,

    pub spec: IdpSpec,
}

/// Informational metadata, not used for orchestration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub maintainers: Vec<Maintainer>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Maintainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpSpec {
    #[serde(default)]
    pub runtime: RuntimeContainer,

    #[serde(default)]
    pub shared: Shared,

    #[serde(default)]
    pub tasks: Vec<Task>,

    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

/// The container that ultimately serves the application
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContainer {
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub volume_mappings: Vec<VolumeMapping>,

    #[serde(default)]
    pub ports: RuntimePorts,
}

/// Ports declared by the runtime image; unset ports are left out
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimePorts {
    #[serde(default)]
    pub internal_http_port: Option<String>,
    #[serde(default)]
    pub internal_https_port: Option<String>,
    #[serde(default)]
    pub internal_debug_port: Option<String>,
    #[serde(default)]
    pub internal_performance_port: Option<String>,
}

/// Shared build containers and the volumes they exchange artifacts through
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shared {
    #[serde(default)]
    pub containers: Vec<Container>,

    #[serde(default)]
    pub volumes: Vec<SharedVolume>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub volume_mappings: Vec<VolumeMapping>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMapping {
    pub volume_name: String,
    pub container_path: String,
    #[serde(default)]
    pub sub_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SharedVolume {
    pub name: String,
    /// Requested size as a Kubernetes quantity, e.g. `1Gi`
    pub size: String,
}

/// Where a task runs: a reusable build unit or the application unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum TaskKind {
    Shared,
    Runtime,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared => write!(f, "Shared"),
            Self::Runtime => write!(f, "Runtime"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: TaskKind,

    /// Shared container the task runs in; required for `Shared` tasks
    #[serde(default)]
    pub container: Option<String>,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub source_mapping: Option<SourceMapping>,
}

impl Task {
    /// Destination of the project sources inside the unit, if any
    #[must_use]
    pub fn source_destination(&self) -> Option<&str> {
        self.source_mapping
            .as_ref()
            .map(|m| m.dest_path.as_str())
            .filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapping {
    #[serde(default)]
    pub dest_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// Image and mounts a task runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContainer {
    pub kind: TaskKind,
    /// Shared container name; empty for the runtime container
    pub name: String,
    pub image: String,
    pub volume_mappings: Vec<VolumeMapping>,
    /// Ports the image listens on; declared for the runtime container only
    pub ports: Vec<String>,
}

impl Idp {
    /// Parse an IDP document from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|source| Error::Yaml {
            path: "<inline>".into(),
            source,
        })
    }

    /// Load an IDP document from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Scenario with the given name
    pub fn scenario(&self, name: &str) -> Result<&Scenario> {
        self.spec
            .scenarios
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::not_found("scenario", name))
    }

    /// Tasks of a scenario, in scenario order.
    ///
    /// Names with no matching task are skipped rather than rejected.
    #[must_use]
    pub fn tasks(&self, scenario: &Scenario) -> Vec<&Task> {
        let mut tasks = Vec::with_capacity(scenario.tasks.len());
        for name in &scenario.tasks {
            let matching: Vec<&Task> = self.spec.tasks.iter().filter(|t| &t.name == name).collect();
            if matching.is_empty() {
                warn!(
                    scenario = %scenario.name,
                    "Scenario references unknown task '{}', skipping it", name
                );
            }
            tasks.extend(matching);
        }
        tasks
    }

    /// Container a task runs in
    pub fn container(&self, task: &Task) -> Result<TaskContainer> {
        let resolved = match task.kind {
            TaskKind::Runtime => Some(TaskContainer {
                kind: TaskKind::Runtime,
                name: String::new(),
                image: self.spec.runtime.image.clone(),
                volume_mappings: self.spec.runtime.volume_mappings.clone(),
                ports: self.ports(),
            }),
            TaskKind::Shared => task.container.as_deref().and_then(|wanted| {
                self.spec
                    .shared
                    .containers
                    .iter()
                    .find(|c| c.name == wanted)
                    .map(|c| TaskContainer {
                        kind: TaskKind::Shared,
                        name: c.name.clone(),
                        image: c.image.clone(),
                        volume_mappings: c.volume_mappings.clone(),
                        ports: Vec::new(),
                    })
            }),
        };

        match resolved {
            Some(container) if !container.image.is_empty() => Ok(container),
            _ => Err(Error::not_found(
                "task container",
                task.container.clone().unwrap_or_else(|| task.name.clone()),
            )),
        }
    }

    /// Declared shared volumes
    #[must_use]
    pub fn shared_volumes(&self) -> &[SharedVolume] {
        &self.spec.shared.volumes
    }

    /// Whether the full build runs at least one task in a shared build container
    pub fn is_shared_build_flow(&self) -> Result<bool> {
        let scenario = self.scenario(FULL_BUILD_SCENARIO)?;
        Ok(self
            .tasks(scenario)
            .iter()
            .any(|t| t.kind == TaskKind::Shared))
    }

    /// Runtime ports that are set, in http, https, debug, performance order
    #[must_use]
    pub fn ports(&self) -> Vec<String> {
        let ports = &self.spec.runtime.ports;
        [
            &ports.internal_http_port,
            &ports.internal_https_port,
            &ports.internal_debug_port,
            &ports.internal_performance_port,
        ]
        .into_iter()
        .filter_map(|p| p.as_ref().filter(|p| !p.is_empty()).cloned())
        .collect()
    }
}
