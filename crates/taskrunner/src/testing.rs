//! In-memory cluster used by unit tests.
//!
//! Created pods and deployment pods start out Running, so discovery on a
//! second run sees whatever the first run created.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, PodStatus, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::gateway::{ClusterGateway, GatewayError, GatewayResult, PodPhase};
use crate::sync::pack_source;

#[derive(Debug, Clone)]
pub struct ExecCall {
    pub pod: String,
    pub container: Option<String>,
    pub command: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CopyCall {
    pub source: PathBuf,
    pub pod: String,
    pub target: String,
    pub archive_len: usize,
}

#[derive(Debug, Clone)]
pub struct WaitCall {
    pub selector: String,
    pub timeout: Option<Duration>,
}

#[derive(Default)]
struct State {
    pods: Vec<Pod>,
    pvcs: Vec<PersistentVolumeClaim>,
    deployments: Vec<Deployment>,
    services: Vec<Service>,
    execs: Vec<ExecCall>,
    copies: Vec<CopyCall>,
    failing_command: Option<String>,
    wait_failure: Option<String>,
    waits: Vec<WaitCall>,
    reject_creates: bool,
    pods_start: bool,
}

pub struct FakeCluster {
    state: Mutex<State>,
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
            None => labels.contains_key(term),
        })
}

fn running_pod(name: &str, labels: BTreeMap<String, String>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        status: Some(PodStatus {
            phase: Some(PodPhase::Running.as_str().to_string()),
            ..PodStatus::default()
        }),
        ..Pod::default()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pods_start: true,
                ..State::default()
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn add_running_pod(&self, name: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.with(|s| s.pods.push(running_pod(name, labels)));
    }

    pub fn add_pvc(&self, name: &str, labels: BTreeMap<String, String>) {
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..ObjectMeta::default()
            },
            ..PersistentVolumeClaim::default()
        };
        self.with(|s| s.pvcs.push(pvc));
    }

    /// Commands containing `needle` exit non-zero
    pub fn fail_command(&self, needle: &str) {
        self.with(|s| s.failing_command = Some(needle.to_string()));
    }

    /// The next wait fails with a transport error
    pub fn fail_next_wait(&self, message: &str) {
        self.with(|s| s.wait_failure = Some(message.to_string()));
    }

    pub fn reject_creates(&self) {
        self.with(|s| s.reject_creates = true);
    }

    /// Created units never reach Running
    pub fn pods_never_start(&self) {
        self.with(|s| s.pods_start = false);
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.with(|s| s.pods.clone())
    }

    pub fn pvcs(&self) -> Vec<PersistentVolumeClaim> {
        self.with(|s| s.pvcs.clone())
    }

    pub fn deployments(&self) -> Vec<Deployment> {
        self.with(|s| s.deployments.clone())
    }

    pub fn services(&self) -> Vec<Service> {
        self.with(|s| s.services.clone())
    }

    pub fn execs(&self) -> Vec<ExecCall> {
        self.with(|s| s.execs.clone())
    }

    pub fn waits(&self) -> Vec<WaitCall> {
        self.with(|s| s.waits.clone())
    }

    pub fn copies(&self) -> Vec<CopyCall> {
        self.with(|s| s.copies.clone())
    }

    fn rejected(name: &str) -> GatewayError {
        GatewayError::Exec(format!("admission webhook denied {name}"))
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn list_pvcs(&self, selector: &str) -> GatewayResult<Vec<PersistentVolumeClaim>> {
        Ok(self.with(|s| {
            s.pvcs
                .iter()
                .filter(|p| matches_selector(p.labels(), selector))
                .cloned()
                .collect()
        }))
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> GatewayResult<PersistentVolumeClaim> {
        let name = pvc.name_any();
        self.with(|s| {
            if s.reject_creates {
                return Err(Self::rejected(&name));
            }
            if s.pvcs.iter().any(|p| p.name_any() == name) {
                return Err(GatewayError::AlreadyExists(name));
            }
            s.pvcs.push(pvc.clone());
            Ok(pvc.clone())
        })
    }

    async fn create_pod(&self, pod: &Pod) -> GatewayResult<Pod> {
        let name = pod.name_any();
        self.with(|s| {
            if s.reject_creates {
                return Err(Self::rejected(&name));
            }
            if s.pods.iter().any(|p| p.name_any() == name) {
                return Err(GatewayError::AlreadyExists(name));
            }
            let mut created = pod.clone();
            if s.pods_start {
                created.status = running_pod(&name, BTreeMap::new()).status;
            }
            s.pods.push(created.clone());
            Ok(created)
        })
    }

    async fn create_deployment(&self, deployment: &Deployment) -> GatewayResult<Deployment> {
        let name = deployment.name_any();
        self.with(|s| {
            if s.reject_creates {
                return Err(Self::rejected(&name));
            }
            if s.deployments.iter().any(|d| d.name_any() == name) {
                return Err(GatewayError::AlreadyExists(name));
            }
            s.deployments.push(deployment.clone());
            if s.pods_start {
                let labels = deployment
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.template.metadata.as_ref())
                    .and_then(|meta| meta.labels.clone())
                    .unwrap_or_default();
                s.pods.push(running_pod(&format!("{name}-0"), labels));
            }
            Ok(deployment.clone())
        })
    }

    async fn create_service(&self, service: &Service) -> GatewayResult<Service> {
        let name = service.name_any();
        self.with(|s| {
            if s.services.iter().any(|svc| svc.name_any() == name) {
                return Err(GatewayError::AlreadyExists(name));
            }
            s.services.push(service.clone());
            Ok(service.clone())
        })
    }

    async fn wait_for_pod_phase(
        &self,
        selector: &str,
        phase: PodPhase,
        timeout: Option<Duration>,
    ) -> GatewayResult<Pod> {
        self.with(|s| {
            s.waits.push(WaitCall {
                selector: selector.to_string(),
                timeout,
            });
            if let Some(message) = s.wait_failure.take() {
                return Err(GatewayError::Exec(message));
            }
            s.pods
                .iter()
                .find(|p| matches_selector(p.labels(), selector) && PodPhase::of(p) == Some(phase))
                .cloned()
                .ok_or_else(|| match timeout {
                    Some(_) => GatewayError::Timeout(selector.to_string()),
                    None => GatewayError::NotFound(selector.to_string()),
                })
        })
    }

    async fn exec(
        &self,
        pod: &str,
        container: Option<&str>,
        command: &[String],
        _stdin: Option<Vec<u8>>,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> GatewayResult<()> {
        let failing = self.with(|s| {
            s.execs.push(ExecCall {
                pod: pod.to_string(),
                container: container.map(str::to_string),
                command: command.to_vec(),
            });
            s.failing_command.clone()
        });

        let line = command.join(" ");
        sink.write_all(format!("ran: {line}\n").as_bytes()).await?;
        match failing {
            Some(needle) if line.contains(&needle) => {
                Err(GatewayError::Exec("command terminated with exit code 1".to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn copy_to_pod(
        &self,
        source: &Path,
        pod: &str,
        _container: Option<&str>,
        target: &str,
        ignores: &[String],
    ) -> GatewayResult<()> {
        let archive = pack_source(source, ignores)?;
        self.with(|s| {
            s.copies.push(CopyCall {
                source: source.to_path_buf(),
                pod: pod.to_string(),
                target: target.to_string(),
                archive_len: archive.len(),
            });
        });
        Ok(())
    }
}
