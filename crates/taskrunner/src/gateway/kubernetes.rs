use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, AttachParams, ListParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::{ClusterGateway, GatewayError, GatewayResult, PodPhase};
use crate::sync::pack_source;

/// `ClusterGateway` backed by the Kubernetes API, scoped to one namespace
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    namespace: String,
}

impl KubeGateway {
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Create the gateway's namespace if it does not exist yet
    pub async fn ensure_namespace(&self) -> GatewayResult<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        if namespaces.get_opt(&self.namespace).await?.is_some() {
            debug!("Namespace {} already exists", self.namespace);
            return Ok(());
        }

        info!("Creating namespace {}", self.namespace);
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        match namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                info!("Namespace {} was created concurrently", self.namespace);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn map_create_error(name: &str, err: kube::Error) -> GatewayError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => GatewayError::AlreadyExists(name.to_string()),
        e => e.into(),
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn list_pvcs(&self, selector: &str) -> GatewayResult<Vec<PersistentVolumeClaim>> {
        let pvcs: Api<PersistentVolumeClaim> = self.api();
        let list = pvcs.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> GatewayResult<PersistentVolumeClaim> {
        let pvcs: Api<PersistentVolumeClaim> = self.api();
        pvcs.create(&PostParams::default(), pvc)
            .await
            .map_err(|e| map_create_error(&pvc.name_any(), e))
    }

    async fn create_pod(&self, pod: &Pod) -> GatewayResult<Pod> {
        self.pods()
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| map_create_error(&pod.name_any(), e))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> GatewayResult<Deployment> {
        let deployments: Api<Deployment> = self.api();
        deployments
            .create(&PostParams::default(), deployment)
            .await
            .map_err(|e| map_create_error(&deployment.name_any(), e))
    }

    async fn create_service(&self, service: &Service) -> GatewayResult<Service> {
        let services: Api<Service> = self.api();
        services
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| map_create_error(&service.name_any(), e))
    }

    async fn wait_for_pod_phase(
        &self,
        selector: &str,
        phase: PodPhase,
        timeout: Option<Duration>,
    ) -> GatewayResult<Pod> {
        let config = watcher::Config::default().labels(selector);
        let selector = selector.to_string();
        let stream = watcher(self.pods(), config).applied_objects();

        let find = {
            let selector = selector.clone();
            async move {
                futures::pin_mut!(stream);
                while let Some(pod) = stream.try_next().await? {
                    let current = PodPhase::of(&pod);
                    if current == Some(phase) {
                        return Ok(pod);
                    }
                    debug!(
                        pod = %pod.name_any(),
                        "Pod is {:?}, waiting for {}", current, phase
                    );
                }
                Err::<Pod, _>(GatewayError::NotFound(selector))
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, find)
                .await
                .map_err(|_| GatewayError::Timeout(selector))?,
            None => find.await,
        }
    }

    async fn exec(
        &self,
        pod: &str,
        container: Option<&str>,
        command: &[String],
        stdin: Option<Vec<u8>>,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> GatewayResult<()> {
        let mut params = AttachParams::default()
            .stdin(stdin.is_some())
            .stdout(true)
            .stderr(true);
        if let Some(container) = container {
            params = params.container(container);
        }

        let mut process = self.pods().exec(pod, command.to_vec(), &params).await?;

        if let Some(bytes) = stdin {
            let mut writer = process
                .stdin()
                .ok_or_else(|| GatewayError::Exec("stdin stream unavailable".to_string()))?;
            writer.write_all(&bytes).await?;
            writer.shutdown().await?;
        }

        let status = process.take_status();
        let stdout = process
            .stdout()
            .ok_or_else(|| GatewayError::Exec("stdout stream unavailable".to_string()))?;
        let stderr = process
            .stderr()
            .ok_or_else(|| GatewayError::Exec("stderr stream unavailable".to_string()))?;

        let mut output = futures::stream::select(ReaderStream::new(stdout), ReaderStream::new(stderr));
        while let Some(chunk) = output.next().await {
            sink.write_all(&chunk?).await?;
        }
        sink.flush().await?;

        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        process
            .join()
            .await
            .map_err(|e| GatewayError::Exec(e.to_string()))?;

        match status {
            Some(s) if s.status.as_deref() == Some("Success") => Ok(()),
            Some(s) => Err(GatewayError::Exec(
                s.message
                    .unwrap_or_else(|| s.reason.unwrap_or_else(|| "command failed".to_string())),
            )),
            None => Err(GatewayError::Exec(
                "exec stream closed without a status".to_string(),
            )),
        }
    }

    async fn copy_to_pod(
        &self,
        source: &Path,
        pod: &str,
        container: Option<&str>,
        target: &str,
        ignores: &[String],
    ) -> GatewayResult<()> {
        let source = source.to_path_buf();
        let ignores = ignores.to_vec();
        let archive = tokio::task::spawn_blocking(move || pack_source(&source, &ignores))
            .await
            .map_err(|e| GatewayError::Exec(format!("archive task failed: {e}")))??;

        debug!(pod = %pod, "Copying {} byte archive into {}", archive.len(), target);
        let command = vec![
            "tar".to_string(),
            "xf".to_string(),
            "-".to_string(),
            "-C".to_string(),
            target.to_string(),
        ];
        let mut sink = tokio::io::sink();
        self.exec(pod, container, &command, Some(archive), &mut sink)
            .await
    }
}
