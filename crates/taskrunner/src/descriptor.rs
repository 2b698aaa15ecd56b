//! Task Execution Descriptor and the compute-unit specs derived from it
//!
//! A descriptor is rebuilt for every task of every run and never persisted;
//! only the objects it produces (and their labels) live on in the cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, PersistentVolumeClaimVolumeSource, Pod, PodSpec,
    PodTemplateSpec, SecurityContext, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::config::TaskRunnerConfig;
use crate::error::{Error, Result};
use crate::idp::{Task, TaskContainer, TaskKind};
use crate::lifecycle::PvcRegistry;
use crate::naming::ResourceNaming;

/// Volume name shared by the scratch volume and the first claim
pub const IDP_VOLUME_NAME: &str = "idp-volume";

const KEEP_ALIVE_COMMAND: &str = "tail";
const KEEP_ALIVE_ARGS: [&str; 2] = ["-f", "/dev/null"];

/// What a unit is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Long-lived build container reused across build cycles
    ReusableBuildContainer,
    /// The unit serving the application
    Component,
}

/// A resolved claim mounted into the unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvcMount {
    pub claim_name: String,
    pub mount_path: String,
    pub sub_path: String,
}

/// Everything the orchestrator knows about the component for this run
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub component: String,
    pub application: String,
    pub namespace: String,
    /// `<component>-<application>`, untruncated
    pub namespaced_object: String,
    pub config: TaskRunnerConfig,
}

/// Per-task record used to build and locate one compute unit
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub kind: UnitKind,
    /// Runtime units get scratch storage instead of claims
    pub use_runtime: bool,
    pub name: String,
    pub image: String,
    pub container_name: String,
    pub namespace: String,
    pub pvc_mounts: Vec<PvcMount>,
    pub service_account_name: String,
    pub privileged: bool,
    pub command: Vec<String>,
    pub source_destination: Option<String>,
    pub labels: BTreeMap<String, String>,
    /// Selector that finds this unit's pod
    pub selector: String,
    pub http_port: i32,
    pub https_port: i32,
    /// Ports the container listens on
    pub container_ports: Vec<i32>,
    /// Backing pod, once discovered or created
    pub pod_name: Option<String>,
}

impl TaskDescriptor {
    /// Build the descriptor for a task whose container is already resolved
    pub fn for_task(
        ctx: &UnitContext,
        task: &Task,
        container: &TaskContainer,
        registry: &PvcRegistry,
    ) -> Result<Self> {
        let (kind, use_runtime, name, labels, selector) = match task.kind {
            TaskKind::Shared => {
                let name = ResourceNaming::shared_unit_name(&ctx.namespaced_object, &container.name);
                let labels =
                    ResourceNaming::shared_unit_labels(&name, &ctx.component, &ctx.application);
                let selector = ResourceNaming::shared_unit_selector(&name);
                (UnitKind::ReusableBuildContainer, false, name, labels, selector)
            }
            TaskKind::Runtime => {
                let name = ResourceNaming::runtime_unit_name(&ctx.namespaced_object);
                let labels =
                    ResourceNaming::runtime_unit_labels(&name, &ctx.component, &ctx.application);
                let selector = ResourceNaming::runtime_unit_selector(&name);
                (UnitKind::Component, true, name, labels, selector)
            }
        };

        let pvc_mounts = container
            .volume_mappings
            .iter()
            .map(|mapping| {
                let claim_name = registry
                    .claim_name(&mapping.volume_name)
                    .ok_or_else(|| Error::not_found("shared volume", mapping.volume_name.clone()))?;
                Ok(PvcMount {
                    claim_name,
                    mount_path: mapping.container_path.clone(),
                    sub_path: mapping.sub_path.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let container_ports = container
            .ports
            .iter()
            .map(|port| {
                port.trim()
                    .parse::<i32>()
                    .ok()
                    .filter(|p| (1..=65535).contains(p))
                    .ok_or_else(|| Error::Config(format!("'{port}' is not a valid container port")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            kind,
            use_runtime,
            container_name: name.clone(),
            name,
            image: container.image.clone(),
            namespace: ctx.namespace.clone(),
            pvc_mounts,
            service_account_name: ctx.config.service_account_name.clone(),
            privileged: ctx.config.privileged,
            command: task.command.clone(),
            source_destination: task.source_destination().map(str::to_string),
            labels,
            selector,
            http_port: ctx.config.http_port,
            https_port: ctx.config.https_port,
            container_ports,
            pod_name: None,
        })
    }

    /// Volumes and mounts for the unit.
    ///
    /// Runtime units get a single memory-backed scratch volume; every other
    /// unit mounts each resolved claim.
    #[must_use]
    pub fn volumes(&self) -> (Vec<Volume>, Vec<VolumeMount>) {
        if self.use_runtime {
            let volumes = vec![Volume {
                name: IDP_VOLUME_NAME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource {
                    medium: Some("Memory".to_string()),
                    ..EmptyDirVolumeSource::default()
                }),
                ..Volume::default()
            }];
            let mounts = self
                .pvc_mounts
                .iter()
                .map(|m| VolumeMount {
                    name: IDP_VOLUME_NAME.to_string(),
                    mount_path: m.mount_path.clone(),
                    sub_path: non_empty(&m.sub_path),
                    ..VolumeMount::default()
                })
                .collect();
            return (volumes, mounts);
        }

        self.pvc_mounts
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let name = if i == 0 {
                    IDP_VOLUME_NAME.to_string()
                } else {
                    format!("{IDP_VOLUME_NAME}-{i}")
                };
                let volume = Volume {
                    name: name.clone(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: m.claim_name.clone(),
                        read_only: None,
                    }),
                    ..Volume::default()
                };
                let mount = VolumeMount {
                    name,
                    mount_path: m.mount_path.clone(),
                    sub_path: non_empty(&m.sub_path),
                    ..VolumeMount::default()
                };
                (volume, mount)
            })
            .unzip()
    }

    /// Whether the container is kept alive instead of running its entrypoint
    #[must_use]
    pub fn keeps_alive(&self) -> bool {
        self.kind == UnitKind::ReusableBuildContainer || self.use_runtime
    }

    fn container(&self, mounts: Vec<VolumeMount>) -> Container {
        let (command, args) = if self.keeps_alive() {
            (
                Some(vec![KEEP_ALIVE_COMMAND.to_string()]),
                Some(KEEP_ALIVE_ARGS.iter().map(|a| (*a).to_string()).collect()),
            )
        } else {
            (None, None)
        };

        Container {
            name: self.container_name.clone(),
            image: Some(self.image.clone()),
            image_pull_policy: Some("Always".to_string()),
            security_context: Some(SecurityContext {
                privileged: Some(self.privileged),
                ..SecurityContext::default()
            }),
            volume_mounts: Some(mounts),
            ports: (!self.container_ports.is_empty()).then(|| {
                self.container_ports
                    .iter()
                    .map(|port| ContainerPort {
                        container_port: *port,
                        ..ContainerPort::default()
                    })
                    .collect()
            }),
            command,
            args,
            env: Some(Vec::new()),
            ..Container::default()
        }
    }

    fn metadata(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels.clone()),
            ..ObjectMeta::default()
        }
    }

    fn pod_spec(&self) -> PodSpec {
        let (volumes, mounts) = self.volumes();
        PodSpec {
            service_account_name: Some(self.service_account_name.clone()),
            volumes: Some(volumes),
            containers: vec![self.container(mounts)],
            ..PodSpec::default()
        }
    }

    /// Bare pod for a reusable build unit
    #[must_use]
    pub fn build_pod(&self) -> Pod {
        Pod {
            metadata: self.metadata(),
            spec: Some(self.pod_spec()),
            ..Pod::default()
        }
    }

    /// Single-replica deployment whose pods carry the descriptor labels
    #[must_use]
    pub fn build_deployment(&self) -> Deployment {
        Deployment {
            metadata: self.metadata(),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(self.labels.clone()),
                    ..LabelSelector::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels.clone()),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(self.pod_spec()),
                },
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        }
    }

    /// NodePort service selecting the unit's pods
    #[must_use]
    pub fn build_service(&self) -> Service {
        let http = ServicePort {
            name: Some("http".to_string()),
            port: self.http_port,
            ..ServicePort::default()
        };
        let ports = match self.kind {
            UnitKind::ReusableBuildContainer => vec![http],
            UnitKind::Component => vec![
                http,
                ServicePort {
                    name: Some("https".to_string()),
                    port: self.https_port,
                    ..ServicePort::default()
                },
            ],
        };

        Service {
            metadata: self.metadata(),
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(ports),
                selector: Some(self.labels.clone()),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
