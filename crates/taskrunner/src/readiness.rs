//! Readiness waits
//!
//! One entry point for both kinds of waits on a unit's pod. A probe asks
//! "is it already running?" and treats a timeout as "no"; a required wait
//! follows creation or precedes a sync and fails the run on timeout.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::gateway::{ClusterGateway, GatewayError, PodPhase};

/// How long to wait for a pod and what a miss means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Bounded existence check; a miss or a failure is not an error
    Probe(Duration),
    /// Must succeed; `None` waits without bound
    Required(Option<Duration>),
}

/// Wait for a pod matching `selector` to be running.
///
/// Returns `Ok(None)` only for a probe. Any probe failure counts as a miss.
pub async fn await_readiness(
    gateway: &dyn ClusterGateway,
    selector: &str,
    wait: Wait,
) -> Result<Option<Pod>> {
    match wait {
        Wait::Probe(limit) => {
            match gateway
                .wait_for_pod_phase(selector, PodPhase::Running, Some(limit))
                .await
            {
                Ok(pod) => Ok(Some(pod)),
                Err(GatewayError::Timeout(_) | GatewayError::NotFound(_)) => {
                    debug!("No running pod for '{}' yet", selector);
                    Ok(None)
                }
                Err(e) => {
                    warn!("Existence check for '{}' failed, treating it as absent: {}", selector, e);
                    Ok(None)
                }
            }
        }
        Wait::Required(limit) => gateway
            .wait_for_pod_phase(selector, PodPhase::Running, limit)
            .await
            .map(Some)
            .map_err(|source| Error::ReadinessTimeout {
                selector: selector.to_string(),
                source,
            }),
    }
}

/// Required wait that hands back the pod itself
pub async fn require_running(
    gateway: &dyn ClusterGateway,
    selector: &str,
    limit: Option<Duration>,
) -> Result<Pod> {
    await_readiness(gateway, selector, Wait::Required(limit))
        .await?
        .ok_or_else(|| Error::ReadinessTimeout {
            selector: selector.to_string(),
            source: GatewayError::NotFound(selector.to_string()),
        })
}
