/*
 * kdo - Iterative Dev Pack task runner for Kubernetes
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Task orchestration core
//!
//! Resolves the ordered tasks of an Iterative Dev Pack (IDP) scenario, makes
//! sure a compute unit (bare pod or deployment + service) backs each task,
//! syncs the local project into it and runs the task command remotely.
//! Everything created in the cluster is labeled so the next invocation finds
//! and reuses it.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod gateway;
pub mod idp;
pub mod lifecycle;
pub mod naming;
pub mod orchestrator;
pub mod readiness;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{LocalConfig, TaskRunnerConfig};
pub use error::{Error, Result};
pub use gateway::{ClusterGateway, GatewayError, KubeGateway};
pub use idp::{Idp, TaskKind};
pub use orchestrator::{BuildKind, RunReport, TaskOrchestrator};
