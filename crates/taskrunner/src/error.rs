//! Error types for the task runner.

use std::path::PathBuf;

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::orchestrator::TaskStep;

/// Errors raised while resolving, provisioning or running IDP tasks.
///
/// Every variant carries the identifying context (task, resource, command) so
/// the invoking layer can print it as-is. Nothing is retried or rolled back.
#[derive(Debug, Error)]
pub enum Error {
    /// Scenario, task, container or volume lookup miss in the specification
    #[error("{what} '{name}' not found in the IDP specification")]
    SpecNotFound { what: &'static str, name: String },

    /// More than one claim carries the labels of a single shared volume
    #[error("Found {count} persistent volume claims for shared volume '{volume}', expected at most one")]
    VolumeAmbiguous { volume: String, count: usize },

    /// The scheduler rejected a pod, PVC, deployment or service
    #[error("Failed to create {kind} '{name}': {source}")]
    CreationFailed {
        kind: &'static str,
        name: String,
        #[source]
        source: GatewayError,
    },

    /// A created unit never reached the Running phase
    #[error("No running pod for selector '{selector}': {source}")]
    ReadinessTimeout {
        selector: String,
        #[source]
        source: GatewayError,
    },

    /// Resetting the target directory or copying the sources failed
    #[error("Unable to sync {} to {target} in pod {pod}: {reason}", source_path.display())]
    SyncFailed {
        source_path: PathBuf,
        target: String,
        pod: String,
        reason: String,
    },

    /// Remote command exited non-zero or the exec stream broke
    #[error("Unable to exec command '{command}' in pod {pod}: {reason}")]
    ExecFailed {
        command: String,
        pod: String,
        reason: String,
    },

    /// A task aborted the run at the given step
    #[error("Task '{task}' failed while {step}: {source}")]
    TaskFailed {
        task: String,
        step: TaskStep,
        #[source]
        source: Box<Error>,
    },

    #[error("Cluster error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl Error {
    pub(crate) fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::SpecNotFound {
            what,
            name: name.into(),
        }
    }

    /// Innermost error, skipping `TaskFailed` wrappers.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Self::TaskFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for task runner operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
