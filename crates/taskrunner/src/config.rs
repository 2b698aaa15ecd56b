//! Runner configuration
//!
//! `LocalConfig` is the per-project file (`.udo/config.yaml`) naming the
//! component, its application and the target namespace. Its optional
//! `runner` section tunes how units are created and waited on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Relative location of the local config inside a project
pub const LOCAL_CONFIG_PATH: &str = ".udo/config.yaml";

/// Per-project configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    /// Component settings
    #[serde(default)]
    pub component: ComponentSettings,

    /// Runner tuning
    #[serde(default)]
    pub runner: TaskRunnerConfig,
}

/// Identity of the component being built
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSettings {
    /// Component name
    #[serde(default)]
    pub name: String,

    /// Application the component belongs to
    #[serde(default)]
    pub application: String,

    /// Target namespace (the project)
    #[serde(default, alias = "project")]
    pub namespace: String,

    /// Local source tree synced into units; relative paths resolve against the project root
    #[serde(default)]
    pub source_path: Option<PathBuf>,

    /// IDP document path; relative paths resolve against the project root
    #[serde(default = "default_idp_path")]
    pub idp_path: PathBuf,
}

fn default_idp_path() -> PathBuf {
    PathBuf::from(".udo/idp.yaml")
}

/// How units are created and waited on
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunnerConfig {
    /// Service account for created pods
    #[serde(default = "default_service_account")]
    pub service_account_name: String,

    /// Run task containers privileged
    #[serde(default = "default_privileged")]
    pub privileged: bool,

    /// Bound on the existence probe before creating a unit
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,

    /// Bound on the readiness wait after creation; unbounded when unset
    #[serde(default)]
    pub readiness_timeout_seconds: Option<u64>,

    /// Bound on the wait for a running pod before syncing into it
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_seconds: u64,

    /// Plain service port
    #[serde(default = "default_http_port")]
    pub http_port: i32,

    /// Secure service port, exposed by runtime units only
    #[serde(default = "default_https_port")]
    pub https_port: i32,

    /// Storage class for shared volume claims; cluster default when unset
    #[serde(default)]
    pub storage_class_name: Option<String>,

    /// Top-level entries of the source tree never copied into units
    #[serde(default = "default_sync_ignores")]
    pub sync_ignores: Vec<String>,
}

fn default_service_account() -> String {
    "default".to_string()
}

fn default_privileged() -> bool {
    true
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_sync_timeout() -> u64 {
    120
}

fn default_http_port() -> i32 {
    9080
}

fn default_https_port() -> i32 {
    9443
}

fn default_sync_ignores() -> Vec<String> {
    vec![".git".to_string()]
}

impl Default for TaskRunnerConfig {
    fn default() -> Self {
        Self {
            service_account_name: default_service_account(),
            privileged: default_privileged(),
            probe_timeout_seconds: default_probe_timeout(),
            readiness_timeout_seconds: None,
            sync_timeout_seconds: default_sync_timeout(),
            http_port: default_http_port(),
            https_port: default_https_port(),
            storage_class_name: None,
            sync_ignores: default_sync_ignores(),
        }
    }
}

impl TaskRunnerConfig {
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    #[must_use]
    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_seconds.map(Duration::from_secs)
    }

    #[must_use]
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_seconds)
    }

    /// Reject settings the cluster would refuse later
    pub fn validate(&self) -> Result<()> {
        if self.service_account_name.trim().is_empty() {
            return Err(Error::Config(
                "serviceAccountName must not be empty".to_string(),
            ));
        }
        if self.probe_timeout_seconds == 0 {
            return Err(Error::Config(
                "probeTimeoutSeconds must be greater than zero".to_string(),
            ));
        }
        if self.sync_timeout_seconds == 0 {
            return Err(Error::Config(
                "syncTimeoutSeconds must be greater than zero".to_string(),
            ));
        }
        for (name, port) in [("httpPort", self.http_port), ("httpsPort", self.https_port)] {
            if !(1..=65535).contains(&port) {
                return Err(Error::Config(format!("{name} {port} is not a valid port")));
            }
        }
        if self.http_port == self.https_port {
            return Err(Error::Config(
                "httpPort and httpsPort must differ".to_string(),
            ));
        }
        Ok(())
    }
}

impl LocalConfig {
    /// Load the local config of a project, or defaults when the file is absent
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(LOCAL_CONFIG_PATH);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

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

    /// Check the resolved settings before anything touches the cluster
    pub fn validate(&self) -> Result<()> {
        if self.component.name.is_empty() {
            return Err(Error::Config("component name is not set".to_string()));
        }
        if self.component.application.is_empty() {
            return Err(Error::Config("application name is not set".to_string()));
        }
        if self.component.namespace.is_empty() {
            return Err(Error::Config("namespace is not set".to_string()));
        }
        self.runner.validate()
    }
}
