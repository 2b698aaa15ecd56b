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

//! kdo - build and run a component from its Iterative Dev Pack.

#![allow(clippy::doc_markdown)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use taskrunner::{BuildKind, Idp, KubeGateway, LocalConfig, TaskOrchestrator};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod ui;

#[derive(Parser)]
#[command(
    name = "kdo",
    version,
    about = "Iterative Dev Pack builds on Kubernetes",
    long_about = "Run the build scenarios of an Iterative Dev Pack against a Kubernetes cluster.\n\n\
                  Build containers, volumes and the runtime deployment are created on first use\n\
                  and reused on every later run."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the component and (re)start its runtime.
    ///
    /// Runs the incremental-build scenario unless --full-build is given.
    Build(BuildCommand),
}

#[derive(Args)]
struct BuildCommand {
    /// Run the full-build scenario
    #[arg(long)]
    full_build: bool,

    /// Project directory holding .udo/config.yaml
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Component name (overrides the local config)
    #[arg(long, env = "KDO_COMPONENT")]
    component: Option<String>,

    /// Application name (overrides the local config)
    #[arg(long = "app", env = "KDO_APP")]
    application: Option<String>,

    /// Target namespace (overrides the local config)
    #[arg(short, long, env = "KDO_NAMESPACE")]
    namespace: Option<String>,

    /// IDP document (overrides the local config)
    #[arg(long, env = "KDO_IDP")]
    idp: Option<PathBuf>,

    /// Create the namespace when it does not exist
    #[arg(long)]
    create_namespace: bool,

    /// Print the build summary as JSON
    #[arg(long)]
    json: bool,
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

impl BuildCommand {
    async fn run(self) -> Result<()> {
        let mut config = LocalConfig::load(&self.project_dir)
            .with_context(|| format!("loading config from {}", self.project_dir.display()))?;

        if let Some(component) = self.component {
            config.component.name = component;
        }
        if let Some(application) = self.application {
            config.component.application = application;
        }
        if let Some(namespace) = self.namespace {
            config.component.namespace = namespace;
        }
        if let Some(idp) = self.idp {
            config.component.idp_path = idp;
        }
        config.validate().context("invalid configuration")?;

        let settings = &config.component;
        let idp_path = resolve(&self.project_dir, &settings.idp_path);
        let idp = Idp::from_file(&idp_path)?;
        let source_path = settings
            .source_path
            .as_deref()
            .map_or_else(|| self.project_dir.clone(), |p| resolve(&self.project_dir, p));
        debug!(idp = %idp_path.display(), source = %source_path.display(), "Resolved project paths");

        let client = kube::Client::try_default()
            .await
            .context("connecting to the Kubernetes cluster")?;
        let gateway = KubeGateway::new(client, settings.namespace.clone());
        if self.create_namespace {
            gateway
                .ensure_namespace()
                .await
                .with_context(|| format!("creating namespace {}", settings.namespace))?;
        }

        let build_kind = BuildKind::from_flag(self.full_build);
        if !self.json {
            ui::print_build_banner(&settings.name, build_kind.scenario_name(), &settings.namespace);
        }

        let orchestrator = TaskOrchestrator::new(
            Arc::new(gateway),
            idp,
            &settings.name,
            &settings.application,
            &settings.namespace,
            config.runner.clone(),
            source_path,
        )?;

        let mut stdout = tokio::io::stdout();
        let report = orchestrator.run(build_kind, &mut stdout).await?;
        info!(tasks = report.tasks.len(), "Build finished");

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            ui::print_report(&report);
            ui::print_build_ready(&settings.name, &report);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info,kdo=debug,taskrunner=debug")
        } else {
            EnvFilter::new("warn,kdo=info,taskrunner=info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Build(cmd) => cmd.run().await,
    };

    if let Err(err) = result {
        ui::print_error(&err);
        std::process::exit(1);
    }
}
