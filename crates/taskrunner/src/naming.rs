use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Longest namespaced object identity kept before suffixing
pub const MAX_PREFIX_LENGTH: usize = 40;
/// Kubernetes object name / label value limit
pub const MAX_K8S_NAME_LENGTH: usize = 63;

const RUNTIME_SUFFIX: &str = "-runtime";
const PVC_SUFFIX: &str = "-pvc";

pub const LABEL_APP: &str = "app";
pub const LABEL_DEPLOYMENT: &str = "deployment";
pub const LABEL_COMPONENT_NAME: &str = "app.kubernetes.io/component-name";
pub const LABEL_STORAGE_NAME: &str = "app.kubernetes.io/storage-name";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";

/// Names and labels of everything the runner creates.
///
/// The label scheme is what later invocations discover units and claims by,
/// so changing any of it orphans existing resources.
pub struct ResourceNaming;

impl ResourceNaming {
    /// `<component>-<application>`, the seed for every generated name
    pub fn namespaced_object(component: &str, application: &str) -> Result<String> {
        if component.is_empty() {
            return Err(Error::Config("component name must not be empty".to_string()));
        }
        if application.is_empty() {
            return Err(Error::Config(
                "application name must not be empty".to_string(),
            ));
        }
        Ok(format!("{component}-{application}"))
    }

    /// Deterministic prefix truncation
    #[must_use]
    pub fn truncate(name: &str, limit: usize) -> String {
        if name.len() <= limit {
            return name.to_string();
        }
        // Back off to a char boundary so non-ASCII input cannot panic
        let mut end = limit;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name[..end].to_string()
    }

    /// Namespaced identity cut to the prefix limit
    #[must_use]
    pub fn prefix(namespaced_object: &str) -> String {
        Self::truncate(namespaced_object, MAX_PREFIX_LENGTH)
    }

    /// Reusable build unit name: `<prefix><container>` capped at 63
    #[must_use]
    pub fn shared_unit_name(namespaced_object: &str, container: &str) -> String {
        let name = format!("{}{container}", Self::prefix(namespaced_object));
        Self::truncate(&name, MAX_K8S_NAME_LENGTH)
    }

    /// Runtime unit name: `<prefix>-runtime`
    #[must_use]
    pub fn runtime_unit_name(namespaced_object: &str) -> String {
        format!("{}{RUNTIME_SUFFIX}", Self::prefix(namespaced_object))
    }

    /// Claim name for a shared volume: `<volume>-<application>-pvc`
    #[must_use]
    pub fn pvc_name(volume: &str, application: &str) -> String {
        let base = Self::truncate(
            &format!("{volume}-{application}"),
            MAX_K8S_NAME_LENGTH - PVC_SUFFIX.len(),
        );
        format!("{base}{PVC_SUFFIX}")
    }

    /// Labels identifying a shared volume's claim
    #[must_use]
    pub fn pvc_labels(component: &str, application: &str, volume: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_COMPONENT_NAME.to_string(), component.to_string()),
            (LABEL_STORAGE_NAME.to_string(), volume.to_string()),
            (LABEL_PART_OF.to_string(), application.to_string()),
        ])
    }

    /// Subset of the claim labels used to discover it
    #[must_use]
    pub fn pvc_selector(component: &str, volume: &str) -> String {
        Self::selector(&BTreeMap::from([
            (LABEL_COMPONENT_NAME.to_string(), component.to_string()),
            (LABEL_STORAGE_NAME.to_string(), volume.to_string()),
        ]))
    }

    /// Labels stamped on a reusable build unit
    #[must_use]
    pub fn shared_unit_labels(
        unit_name: &str,
        component: &str,
        application: &str,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_APP.to_string(), unit_name.to_string()),
            (LABEL_COMPONENT_NAME.to_string(), component.to_string()),
            (LABEL_PART_OF.to_string(), application.to_string()),
        ])
    }

    /// Labels stamped on the runtime deployment, its pods and its service
    #[must_use]
    pub fn runtime_unit_labels(
        unit_name: &str,
        component: &str,
        application: &str,
    ) -> BTreeMap<String, String> {
        let mut labels = Self::shared_unit_labels(unit_name, component, application);
        labels.insert(LABEL_DEPLOYMENT.to_string(), unit_name.to_string());
        labels
    }

    /// Selector for a reusable build unit's pod
    #[must_use]
    pub fn shared_unit_selector(unit_name: &str) -> String {
        format!("{LABEL_APP}={unit_name}")
    }

    /// Selector for the runtime deployment's pod
    #[must_use]
    pub fn runtime_unit_selector(unit_name: &str) -> String {
        format!("{LABEL_APP}={unit_name},{LABEL_DEPLOYMENT}={unit_name}")
    }

    /// Render labels as an equality-based selector, `k=v,k=v`
    #[must_use]
    pub fn selector(labels: &BTreeMap<String, String>) -> String {
        labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}
