//! # Secret Backends
//!
//! The two cloud backends behind a mount: SSM Parameter Store (batched)
//! and Secrets Manager (per-secret with rotation tracking). Both are
//! driven through the same failover loop: regions are consulted in order,
//! a retryable failure advances to the next region, a fatal failure
//! short-circuits with the failing region named in the error.
//!
//! The raw cloud calls sit behind narrow [`ParameterStoreApi`] /
//! [`SecretsManagerApi`] traits so the pipeline can be exercised against
//! in-memory fakes.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{AgentCredentialsProvider, Identity, PodIdentityAgentClient, StsWebIdentityProvider};
use crate::config::{endpoint_url_override, ProviderConfig};
use crate::descriptor::SecretDescriptor;
use crate::error::{is_fatal, ApiError};

pub mod parameter_store;
pub mod secrets_manager;

pub use parameter_store::{AwsParameterStore, ParameterStoreBackend};
pub use secrets_manager::{AwsSecretsManager, SecretsManagerBackend};

/// Rotation bookkeeping carried between mounts by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectVersion {
    /// Descriptor alias, not the object name
    pub id: String,
    /// Backend version: decimal for parameters, version id for secrets
    pub version: String,
}

/// One fetched artifact bound for the target directory.
#[derive(Debug, Clone)]
pub struct SecretArtifact {
    /// Descriptor position in the request, for deterministic output order
    pub index: usize,
    pub file_name: String,
    pub mode: u32,
    pub data: Vec<u8>,
}

/// Version emitted for a descriptor, tagged with its request position.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    pub index: usize,
    pub id: String,
    pub version: String,
}

/// Result of one backend over one mount: the artifacts that were fetched
/// plus a version record for every descriptor, including skipped ones.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub artifacts: Vec<SecretArtifact>,
    pub versions: Vec<VersionRecord>,
}

impl FetchOutcome {
    /// Merge another backend's outcome into this one.
    pub fn merge(&mut self, other: Self) {
        self.artifacts.extend(other.artifacts);
        self.versions.extend(other.versions);
    }
}

/// A parameter returned by a batch get.
#[derive(Debug, Clone)]
pub struct FetchedParameter {
    pub name: String,
    pub arn: Option<String>,
    pub value: String,
    pub version: i64,
}

/// Response to one batch get: resolved parameters plus the names the
/// service rejected.
#[derive(Debug, Clone, Default)]
pub struct ParameterBatch {
    pub parameters: Vec<FetchedParameter>,
    pub invalid: Vec<String>,
}

/// The slice of the parameter store the backend needs.
#[async_trait]
pub trait ParameterStoreApi: Send + Sync {
    /// Batched get by name selector (`name`, `name:version`, `name:label`).
    async fn get_parameters(&self, selectors: &[String]) -> Result<ParameterBatch, ApiError>;
}

/// A secret value at a concrete version.
#[derive(Debug, Clone)]
pub struct FetchedSecret {
    pub data: Vec<u8>,
    pub version_id: String,
}

/// Metadata needed to resolve a version stage to a version id.
#[derive(Debug, Clone, Default)]
pub struct SecretMetadata {
    /// version id → stages attached to it
    pub version_stages: HashMap<String, Vec<String>>,
}

/// The slice of the secrets manager the backend needs.
#[async_trait]
pub trait SecretsManagerApi: Send + Sync {
    async fn get_secret_value(
        &self,
        secret_id: &str,
        version_id: Option<&str>,
        version_stage: Option<&str>,
    ) -> Result<FetchedSecret, ApiError>;

    async fn describe_secret(&self, secret_id: &str) -> Result<SecretMetadata, ApiError>;
}

/// Per-region pair of backend clients sharing one credentials provider.
#[derive(Clone)]
pub struct RegionClients {
    pub region: String,
    pub parameter_store: Arc<dyn ParameterStoreApi>,
    pub secrets_manager: Arc<dyn SecretsManagerApi>,
}

impl std::fmt::Debug for RegionClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionClients")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// What the orchestrator sees of a backend.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Fetch all descriptors, consulting regions in order with failover.
    /// `prior` maps descriptor alias to the version from the previous
    /// mount.
    async fn fetch(
        &self,
        descriptors: &[SecretDescriptor],
        prior: &HashMap<String, String>,
    ) -> Result<FetchOutcome>;
}

/// Shared failover loop.
///
/// Advances to the next region only on retryable failures; a fatal error
/// is surfaced immediately with the region name prefixed. When every
/// region failed retryably, the causes are folded into one error.
pub(crate) async fn run_with_failover<F, Fut>(
    backend_name: &'static str,
    regions: &[String],
    mut fetch_region: F,
) -> Result<FetchOutcome>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<FetchOutcome>>,
{
    let mut failures: Vec<String> = Vec::new();
    for (region_idx, region) in regions.iter().enumerate() {
        match fetch_region(region_idx).await {
            Ok(outcome) => {
                if region_idx > 0 {
                    info!(
                        "{} succeeded in failover region {} after {} retryable failure(s)",
                        backend_name,
                        region,
                        failures.len()
                    );
                }
                return Ok(outcome);
            }
            Err(err) if is_fatal(&err) => {
                return Err(err.context(format!("{region}: {backend_name} request failed")));
            }
            Err(err) => {
                warn!(
                    "{}: retryable {} failure, trying next region if any: {:#}",
                    region, backend_name, err
                );
                failures.push(format!("{region}: {err:#}"));
            }
        }
    }

    let detail = failures.join("; ");
    if regions.len() > 1 {
        Err(anyhow!("{backend_name} failed in all regions: {detail}"))
    } else {
        Err(anyhow!("{backend_name} failed: {detail}"))
    }
}

/// Identity bound to one region, token already attached.
#[derive(Debug, Clone)]
pub struct RegionIdentity {
    pub region: String,
    pub identity: Identity,
    pub token: String,
}

/// Assembles the per-region client pairs for a mount.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Build clients for each region. A region whose identity cannot
    /// produce credentials is skipped; no usable region is an error.
    async fn region_clients(&self, identities: &[RegionIdentity]) -> Result<Vec<RegionClients>>;
}

/// [`ClientFactory`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct AwsClientFactory {
    config: ProviderConfig,
}

impl AwsClientFactory {
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    async fn credentials_for(
        &self,
        bound: &RegionIdentity,
    ) -> Result<SharedCredentialsProvider> {
        let provider = match &bound.identity {
            Identity::Role { role_arn } => {
                let sts = crate::auth::role::sts_client(&bound.region).await;
                SharedCredentialsProvider::new(StsWebIdentityProvider::new(
                    sts,
                    role_arn.clone(),
                    bound.token.clone(),
                ))
            }
            Identity::Agent { preference } => {
                let agent = PodIdentityAgentClient::new(self.config.agent_timeout())?;
                SharedCredentialsProvider::new(AgentCredentialsProvider::new(
                    agent,
                    bound.token.clone(),
                    *preference,
                ))
            }
        };

        // Validate once up front so a region with broken identity is
        // skipped here instead of surfacing as a backend failure later.
        provider
            .provide_credentials()
            .await
            .with_context(|| format!("identity check failed for region {}", bound.region))?;
        Ok(provider)
    }
}

#[async_trait]
impl ClientFactory for AwsClientFactory {
    async fn region_clients(&self, identities: &[RegionIdentity]) -> Result<Vec<RegionClients>> {
        let mut clients = Vec::with_capacity(identities.len());
        for bound in identities {
            let credentials = match self.credentials_for(bound).await {
                Ok(credentials) => credentials,
                Err(err) => {
                    warn!("Skipping region {}: {:#}", bound.region, err);
                    continue;
                }
            };

            let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(bound.region.clone()))
                .credentials_provider(credentials)
                .load()
                .await;

            let mut ssm_builder = aws_sdk_ssm::config::Builder::from(&sdk_config);
            if let Some(url) = endpoint_url_override("SSM") {
                ssm_builder = ssm_builder.endpoint_url(url);
            }
            let mut sm_builder = aws_sdk_secretsmanager::config::Builder::from(&sdk_config);
            if let Some(url) = endpoint_url_override("SECRETS_MANAGER") {
                sm_builder = sm_builder.endpoint_url(url);
            }

            clients.push(RegionClients {
                region: bound.region.clone(),
                parameter_store: Arc::new(AwsParameterStore::new(aws_sdk_ssm::Client::from_conf(
                    ssm_builder.build(),
                ))),
                secrets_manager: Arc::new(AwsSecretsManager::new(
                    aws_sdk_secretsmanager::Client::from_conf(sm_builder.build()),
                )),
            });
        }

        if clients.is_empty() {
            return Err(anyhow!(
                "workload identity failed in every region: no backend clients could be assembled"
            ));
        }
        Ok(clients)
    }
}
