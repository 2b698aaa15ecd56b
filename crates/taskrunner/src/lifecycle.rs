//! Resource lifecycle and discovery
//!
//! Discover-or-create for shared volume claims and compute units. Lookups go
//! by label, so anything an earlier run created is found and reused. There
//! is no lock: two concurrent runs against one component can both miss and
//! both create. Creation is at-least-once under a single caller.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::descriptor::TaskDescriptor;
use crate::error::{Error, Result};
use crate::gateway::{ClusterGateway, GatewayError};
use crate::idp::{SharedVolume, TaskKind};
use crate::naming::ResourceNaming;
use crate::readiness::{await_readiness, Wait};

/// Shared volume name to its resolved claim.
///
/// Filled once before any task runs and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct PvcRegistry {
    claims: BTreeMap<String, String>,
}

impl PvcRegistry {
    /// Claim name backing a shared volume
    #[must_use]
    pub fn claim_name(&self, volume: &str) -> Option<String> {
        self.claims.get(volume).cloned()
    }

    pub(crate) fn insert_claim(&mut self, volume: &str, claim_name: &str) {
        self.claims
            .insert(volume.to_string(), claim_name.to_string());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Where a unit came from on this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioning {
    Reused,
    Created,
}

/// Discover-or-create driver for one component
pub struct ResourceLifecycle<'a> {
    gateway: &'a dyn ClusterGateway,
    component: &'a str,
    application: &'a str,
    storage_class_name: Option<&'a str>,
    probe_timeout: Duration,
    readiness_timeout: Option<Duration>,
}

impl<'a> ResourceLifecycle<'a> {
    #[must_use]
    pub fn new(
        gateway: &'a dyn ClusterGateway,
        component: &'a str,
        application: &'a str,
        storage_class_name: Option<&'a str>,
        probe_timeout: Duration,
        readiness_timeout: Option<Duration>,
    ) -> Self {
        Self {
            gateway,
            component,
            application,
            storage_class_name,
            probe_timeout,
            readiness_timeout,
        }
    }

    /// Resolve every shared volume to a claim, creating missing ones
    pub async fn resolve_volumes(&self, volumes: &[SharedVolume]) -> Result<PvcRegistry> {
        let mut registry = PvcRegistry::default();
        for volume in volumes {
            let claim = self.ensure_volume(volume).await?;
            let name = claim.name_any();
            info!("📦 Using PVC {} for shared volume {}", name, volume.name);
            registry.insert_claim(&volume.name, &name);
        }
        Ok(registry)
    }

    /// Find the claim labeled for (component, volume), or create it
    pub async fn ensure_volume(&self, volume: &SharedVolume) -> Result<PersistentVolumeClaim> {
        let selector = ResourceNaming::pvc_selector(self.component, &volume.name);
        let mut existing = self.gateway.list_pvcs(&selector).await?;

        match existing.len() {
            0 => {
                let pvc = self.build_pvc(volume);
                let name = pvc.name_any();
                info!("Creating PVC {} ({})", name, volume.size);
                self.gateway
                    .create_pvc(&pvc)
                    .await
                    .map_err(|source| Error::CreationFailed {
                        kind: "persistent volume claim",
                        name,
                        source,
                    })
            }
            1 => {
                let pvc = existing.remove(0);
                debug!("PVC {} already exists", pvc.name_any());
                Ok(pvc)
            }
            count => Err(Error::VolumeAmbiguous {
                volume: volume.name.clone(),
                count,
            }),
        }
    }

    fn build_pvc(&self, volume: &SharedVolume) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(ResourceNaming::pvc_name(&volume.name, self.application)),
                labels: Some(ResourceNaming::pvc_labels(
                    self.component,
                    self.application,
                    &volume.name,
                )),
                ..ObjectMeta::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(volume.size.clone()),
                    )])),
                    ..VolumeResourceRequirements::default()
                }),
                storage_class_name: self.storage_class_name.map(str::to_string),
                ..PersistentVolumeClaimSpec::default()
            }),
            ..PersistentVolumeClaim::default()
        }
    }

    /// Make sure a running pod backs the descriptor and record its name.
    ///
    /// Shared tasks get a bare pod, runtime tasks a deployment plus service.
    pub async fn ensure_unit(
        &self,
        kind: TaskKind,
        descriptor: &mut TaskDescriptor,
    ) -> Result<Provisioning> {
        let selector = descriptor.selector.clone();
        debug!("Checking whether unit {} is already running", descriptor.name);

        if let Some(pod) =
            await_readiness(self.gateway, &selector, Wait::Probe(self.probe_timeout)).await?
        {
            info!("♻️ Running pod found: {}", pod.name_any());
            descriptor.pod_name = Some(pod.name_any());
            return Ok(Provisioning::Reused);
        }

        match kind {
            TaskKind::Shared => {
                info!("🚀 Creating reusable build pod {}", descriptor.name);
                let pod = descriptor.build_pod();
                self.create(self.gateway.create_pod(&pod).await, "pod", &descriptor.name)?;
            }
            TaskKind::Runtime => {
                info!("🚀 Deploying runtime unit {}", descriptor.name);
                let deployment = descriptor.build_deployment();
                self.create(
                    self.gateway.create_deployment(&deployment).await,
                    "deployment",
                    &descriptor.name,
                )?;
                let service = descriptor.build_service();
                self.create(
                    self.gateway.create_service(&service).await,
                    "service",
                    &descriptor.name,
                )?;
            }
        }

        info!("Waiting for {} to run", descriptor.name);
        let pod = await_readiness(
            self.gateway,
            &selector,
            Wait::Required(self.readiness_timeout),
        )
        .await?
        .ok_or_else(|| Error::ReadinessTimeout {
            selector: selector.clone(),
            source: GatewayError::NotFound(selector.clone()),
        })?;

        info!("✅ Unit {} is running in pod {}", descriptor.name, pod.name_any());
        descriptor.pod_name = Some(pod.name_any());
        Ok(Provisioning::Created)
    }

    /// Map a creation result; an existing object counts as created by someone else
    fn create<T>(
        &self,
        result: std::result::Result<T, GatewayError>,
        kind: &'static str,
        name: &str,
    ) -> Result<()> {
        match result {
            Ok(_) => {
                debug!("Created {} {}", kind, name);
                Ok(())
            }
            Err(GatewayError::AlreadyExists(_)) => {
                info!("{} {} already exists, waiting for it instead", kind, name);
                Ok(())
            }
            Err(source) => Err(Error::CreationFailed {
                kind,
                name: name.to_string(),
                source,
            }),
        }
    }
}
