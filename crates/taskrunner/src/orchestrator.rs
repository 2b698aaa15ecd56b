//! Task orchestration
//!
//! Runs one build cycle: resolves the scenario's tasks, provisions shared
//! volumes, then walks each task through its steps in order. The first
//! failure stops the run and leaves everything created so far in place.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWrite;
use tracing::{info, instrument};

use crate::config::TaskRunnerConfig;
use crate::descriptor::{TaskDescriptor, UnitContext};
use crate::error::{Error, Result};
use crate::gateway::ClusterGateway;
use crate::idp::{Idp, Task, TaskKind, FULL_BUILD_SCENARIO, INCREMENTAL_BUILD_SCENARIO};
use crate::lifecycle::{Provisioning, PvcRegistry, ResourceLifecycle};
use crate::naming::ResourceNaming;
use crate::sync::{execute_task, sync_project, SyncTarget};

/// Which build cycle to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    Full,
    Incremental,
}

impl BuildKind {
    #[must_use]
    pub fn from_flag(full_build: bool) -> Self {
        if full_build {
            Self::Full
        } else {
            Self::Incremental
        }
    }

    #[must_use]
    pub fn scenario_name(self) -> &'static str {
        match self {
            Self::Full => FULL_BUILD_SCENARIO,
            Self::Incremental => INCREMENTAL_BUILD_SCENARIO,
        }
    }
}

/// Step a task was working on; each follows the one before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    ContainerResolved,
    UnitReady,
    Synced,
    Executed,
}

impl fmt::Display for TaskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phrase = match self {
            Self::ContainerResolved => "resolving the container",
            Self::UnitReady => "preparing the compute unit",
            Self::Synced => "syncing the project",
            Self::Executed => "executing the command",
        };
        f.write_str(phrase)
    }
}

/// What happened to one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub task: String,
    pub kind: TaskKind,
    pub unit: String,
    pub pod: String,
    pub created: bool,
    pub synced: bool,
    pub executed: bool,
}

/// Summary of a finished build cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub scenario: String,
    /// Shared volume name and the claim backing it
    pub volumes: Vec<(String, String)>,
    pub tasks: Vec<TaskOutcome>,
}

/// Drives the tasks of one component through a build cycle
pub struct TaskOrchestrator {
    gateway: Arc<dyn ClusterGateway>,
    idp: Idp,
    context: UnitContext,
    source_path: PathBuf,
}

impl TaskOrchestrator {
    /// Set up a run for `component` of `application`.
    ///
    /// Fails when either name is empty.
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        idp: Idp,
        component: &str,
        application: &str,
        namespace: &str,
        config: TaskRunnerConfig,
        source_path: PathBuf,
    ) -> Result<Self> {
        let namespaced_object = ResourceNaming::namespaced_object(component, application)?;
        Ok(Self {
            gateway,
            idp,
            context: UnitContext {
                component: component.to_string(),
                application: application.to_string(),
                namespace: namespace.to_string(),
                namespaced_object,
                config,
            },
            source_path,
        })
    }

    fn lifecycle(&self) -> ResourceLifecycle<'_> {
        let config = &self.context.config;
        ResourceLifecycle::new(
            self.gateway.as_ref(),
            &self.context.component,
            &self.context.application,
            config.storage_class_name.as_deref(),
            config.probe_timeout(),
            config.readiness_timeout(),
        )
    }

    /// Run the scenario for `build_kind`, streaming command output to `sink`
    #[instrument(skip(self, sink), fields(component = %self.context.component))]
    pub async fn run(
        &self,
        build_kind: BuildKind,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<RunReport> {
        let scenario = self.idp.scenario(build_kind.scenario_name())?;
        let tasks = self.idp.tasks(scenario);
        info!("🏗️ Running {} with {} task(s)", scenario.name, tasks.len());

        let lifecycle = self.lifecycle();
        let registry = lifecycle.resolve_volumes(self.idp.shared_volumes()).await?;

        let mut report = RunReport {
            scenario: scenario.name.clone(),
            volumes: self
                .idp
                .shared_volumes()
                .iter()
                .filter_map(|v| registry.claim_name(&v.name).map(|c| (v.name.clone(), c)))
                .collect(),
            tasks: Vec::with_capacity(tasks.len()),
        };

        for task in tasks {
            let outcome = self
                .run_task(&lifecycle, &registry, task, sink)
                .await
                .map_err(|(step, source)| Error::TaskFailed {
                    task: task.name.clone(),
                    step,
                    source: Box::new(source),
                })?;
            report.tasks.push(outcome);
        }

        info!("✅ {} finished", report.scenario);
        Ok(report)
    }

    async fn run_task(
        &self,
        lifecycle: &ResourceLifecycle<'_>,
        registry: &PvcRegistry,
        task: &Task,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::result::Result<TaskOutcome, (TaskStep, Error)> {
        info!(task = %task.name, kind = %task.kind, "Starting task");

        let at = |step: TaskStep| move |e: Error| (step, e);

        let container = self
            .idp
            .container(task)
            .map_err(at(TaskStep::ContainerResolved))?;
        let mut descriptor = TaskDescriptor::for_task(&self.context, task, &container, registry)
            .map_err(at(TaskStep::ContainerResolved))?;

        let provisioning = lifecycle
            .ensure_unit(task.kind, &mut descriptor)
            .await
            .map_err(at(TaskStep::UnitReady))?;
        let mut pod = descriptor.pod_name.clone().unwrap_or_default();

        let synced = match descriptor.source_destination.as_deref() {
            Some(target) => {
                pod = self
                    .sync(&descriptor, target)
                    .await
                    .map_err(at(TaskStep::Synced))?;
                true
            }
            None => false,
        };

        let executed = match task.kind {
            TaskKind::Shared => true,
            TaskKind::Runtime => !descriptor.command.is_empty(),
        };
        if executed {
            execute_task(
                self.gateway.as_ref(),
                &descriptor.command,
                &pod,
                Some(descriptor.container_name.as_str()),
                sink,
            )
            .await
            .map_err(at(TaskStep::Executed))?;
        }

        Ok(TaskOutcome {
            task: task.name.clone(),
            kind: task.kind,
            unit: descriptor.name,
            pod,
            created: provisioning == Provisioning::Created,
            synced,
            executed,
        })
    }

    async fn sync(&self, descriptor: &TaskDescriptor, target: &str) -> Result<String> {
        let config = &self.context.config;
        sync_project(
            self.gateway.as_ref(),
            &self.source_path,
            SyncTarget {
                selector: &descriptor.selector,
                container: Some(descriptor.container_name.as_str()),
                target,
                ignores: &config.sync_ignores,
                readiness_timeout: Some(config.sync_timeout()),
            },
        )
        .await
    }
}
