//! Cluster Resource Gateway
//!
//! The only seam between the orchestration logic and the scheduler. The
//! orchestrator builds complete Kubernetes objects and hands them over here;
//! `KubeGateway` talks to a real API server, tests use an in-memory double.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use thiserror::Error;
use tokio::io::AsyncWrite;

mod kubernetes;

pub use kubernetes::KubeGateway;

/// Errors surfaced by the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Kubernetes API call failed
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Watch stream broke
    #[error("Watch error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    /// Object with that name is already present
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// No pod reached the wanted phase in time
    #[error("Timed out waiting for a pod matching '{0}'")]
    Timeout(String),

    /// Watch ended without a matching pod
    #[error("No pod matching '{0}'")]
    NotFound(String),

    /// Remote command failed or exited non-zero
    #[error("Exec failed: {0}")]
    Exec(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Pod lifecycle phase as reported in `status.phase`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }

    /// Phase of a pod, `None` while the status is not populated yet
    #[must_use]
    pub fn of(pod: &Pod) -> Option<Self> {
        let phase = pod.status.as_ref()?.phase.as_deref()?;
        Some(match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        })
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations the runner needs from the cluster, scoped to one namespace
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Claims matching an equality-based label selector
    async fn list_pvcs(&self, selector: &str) -> GatewayResult<Vec<PersistentVolumeClaim>>;

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> GatewayResult<PersistentVolumeClaim>;

    async fn create_pod(&self, pod: &Pod) -> GatewayResult<Pod>;

    async fn create_deployment(&self, deployment: &Deployment) -> GatewayResult<Deployment>;

    async fn create_service(&self, service: &Service) -> GatewayResult<Service>;

    /// Wait until a pod matching `selector` is in `phase`.
    ///
    /// `None` waits without bound; an elapsed timeout is `GatewayError::Timeout`.
    async fn wait_for_pod_phase(
        &self,
        selector: &str,
        phase: PodPhase,
        timeout: Option<Duration>,
    ) -> GatewayResult<Pod>;

    /// Run `command` in a pod, streaming merged stdout/stderr into `sink`
    async fn exec(
        &self,
        pod: &str,
        container: Option<&str>,
        command: &[String],
        stdin: Option<Vec<u8>>,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> GatewayResult<()>;

    /// Copy the contents of a local directory into `target` inside a pod
    async fn copy_to_pod(
        &self,
        source: &Path,
        pod: &str,
        container: Option<&str>,
        target: &str,
        ignores: &[String],
    ) -> GatewayResult<()>;
}
