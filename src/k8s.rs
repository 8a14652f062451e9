//! # Workload Metadata
//!
//! The narrow Kubernetes surface the provider needs: the IAM role
//! annotation on the workload's service account, and the region label of
//! the node a pod runs on. Kept behind a trait so the mount pipeline can
//! be exercised without a cluster.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, ServiceAccount};
use kube::Api;
use tracing::debug;

use crate::constants::{REGION_NODE_LABEL, ROLE_ARN_ANNOTATION};

/// Cluster metadata lookups performed during a mount.
#[async_trait]
pub trait WorkloadMeta: Send + Sync {
    /// IAM role annotated on the given service account, if any.
    async fn service_account_role_arn(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>>;

    /// Region label of the node the given pod is scheduled on, if any.
    async fn node_region(&self, namespace: &str, pod_name: &str) -> Result<Option<String>>;
}

/// [`WorkloadMeta`] backed by the cluster API.
#[derive(Clone)]
pub struct KubeWorkloadMeta {
    client: kube::Client,
}

impl std::fmt::Debug for KubeWorkloadMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeWorkloadMeta").finish_non_exhaustive()
    }
}

impl KubeWorkloadMeta {
    #[must_use]
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster (or kubeconfig) default.
    pub async fn try_default() -> Result<Self> {
        let client = kube::Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl WorkloadMeta for KubeWorkloadMeta {
    async fn service_account_role_arn(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let account = accounts
            .get(name)
            .await
            .with_context(|| format!("Failed to get service account {namespace}/{name}"))?;
        let role_arn = account
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ROLE_ARN_ANNOTATION))
            .cloned();
        debug!(
            "Service account {}/{} role annotation: {:?}",
            namespace, name, role_arn
        );
        Ok(role_arn)
    }

    async fn node_region(&self, namespace: &str, pod_name: &str) -> Result<Option<String>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods
            .get(pod_name)
            .await
            .with_context(|| format!("Failed to get pod {namespace}/{pod_name}"))?;
        let Some(node_name) = pod.spec.and_then(|spec| spec.node_name) else {
            return Ok(None);
        };

        let nodes: Api<Node> = Api::all(self.client.clone());
        let node = nodes
            .get(&node_name)
            .await
            .with_context(|| format!("Failed to get node {node_name}"))?;
        let region = node
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(REGION_NODE_LABEL))
            .cloned();
        debug!("Node {} region label: {:?}", node_name, region);
        Ok(region)
    }
}
