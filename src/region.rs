//! # Region Resolution
//!
//! Determines the ordered region list for a mount: the primary region from
//! the request, the process environment, or the label of the node the
//! requesting pod runs on, plus an optional failover region that must
//! differ from the primary.

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::constants::REGION_ENV_VAR;
use crate::k8s::WorkloadMeta;

/// Resolve the ordered list of 1 or 2 regions for a mount.
pub async fn resolve_regions(
    region_attr: &str,
    failover_attr: &str,
    meta: &dyn WorkloadMeta,
    namespace: &str,
    pod_name: &str,
) -> Result<Vec<String>> {
    let primary = if !region_attr.trim().is_empty() {
        region_attr.trim().to_string()
    } else if let Some(region) = env_region() {
        debug!("Using region {} from process environment", region);
        region
    } else {
        let node_region = meta.node_region(namespace, pod_name).await?;
        match node_region {
            Some(region) if !region.is_empty() => {
                debug!("Using region {} from node label", region);
                region
            }
            _ => {
                return Err(anyhow!(
                    "failed to resolve region: not in the mount request, the environment, or the node labels of pod {namespace}/{pod_name}"
                ));
            }
        }
    };

    let failover = failover_attr.trim();
    if failover.is_empty() {
        return Ok(vec![primary]);
    }
    if failover == primary {
        return Err(anyhow!(
            "failover region '{failover}' must differ from the primary region"
        ));
    }
    Ok(vec![primary, failover.to_string()])
}

fn env_region() -> Option<String> {
    std::env::var(REGION_ENV_VAR)
        .ok()
        .filter(|region| !region.is_empty())
}
