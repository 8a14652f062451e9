//! # Provider Service
//!
//! The mount pipeline behind the driver-facing RPC surface. The transport
//! itself (socket registration, process lifecycle) lives in the embedding
//! binary; this type implements the two calls it forwards: `mount` and
//! `version`.
//!
//! Per mount: unpack and validate the request, resolve regions and
//! workload identity, assemble per-region clients, parse descriptors,
//! fan out to the two backends in parallel with failover, derive JMESPath
//! sub-artifacts, then either write files atomically into the target
//! directory or hand the payloads back to the driver.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{resolve_identity, TokenBundle, TokenCache};
use crate::backend::{
    AwsClientFactory, ClientFactory, FetchOutcome, ObjectVersion, ParameterStoreBackend,
    RegionIdentity, SecretArtifact, SecretBackend, SecretsManagerBackend,
};
use crate::config::{AddressPreference, ProviderConfig};
use crate::constants::{attributes, DEFAULT_FILE_MODE, PROVIDER_API_VERSION};
use crate::descriptor::{parse_descriptors, PathTranslation, SecretDescriptor};
use crate::extract;
use crate::k8s::{KubeWorkloadMeta, WorkloadMeta};
use crate::materialize;
use crate::region::resolve_regions;

/// A mount request as handed over by the driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRequest {
    /// JSON object of mount attributes
    pub attributes: String,
    /// Target directory of the volume
    pub target_path: String,
    /// JSON-encoded default file mode
    #[serde(default)]
    pub permission: String,
    /// Rotation state from the previous mount of this volume
    #[serde(default)]
    pub current_object_version: Vec<ObjectVersion>,
}

/// One file returned to the driver when it performs the writes itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub path: String,
    pub mode: i32,
    pub contents: Vec<u8>,
}

/// Response to a mount: rotation state always, file payloads only when the
/// driver writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
    pub object_version: Vec<ObjectVersion>,
}

/// Response to a version call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub version: String,
    pub runtime_name: String,
    pub runtime_version: String,
}

/// The provider service: process configuration, the workload-metadata
/// handle, the client factory, and the process-wide token cache.
pub struct ProviderService {
    config: ProviderConfig,
    meta: Arc<dyn WorkloadMeta>,
    clients: Arc<dyn ClientFactory>,
    token_cache: TokenCache,
}

impl std::fmt::Debug for ProviderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProviderService {
    #[must_use]
    pub fn new(
        config: ProviderConfig,
        meta: Arc<dyn WorkloadMeta>,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            config,
            meta,
            clients,
            token_cache: TokenCache::new(),
        }
    }

    /// Service wired to the cluster API and the AWS SDK.
    pub async fn aws_default(config: ProviderConfig) -> Result<Self> {
        let meta = Arc::new(KubeWorkloadMeta::try_default().await?);
        let factory = Arc::new(AwsClientFactory::new(config.clone()));
        Ok(Self::new(config, meta, factory))
    }

    /// The provider's protocol and runtime identification.
    #[must_use]
    pub fn version(&self) -> VersionResponse {
        VersionResponse {
            version: PROVIDER_API_VERSION.to_string(),
            runtime_name: env!("CARGO_PKG_NAME").to_string(),
            runtime_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Service one mount request.
    pub async fn mount(&self, request: &MountRequest) -> Result<MountResponse> {
        if request.target_path.trim().is_empty() {
            bail!("mount request has no target path");
        }
        let attrs: HashMap<String, String> = serde_json::from_str(&request.attributes)
            .context("Failed to parse mount attributes as JSON")?;
        let attr = |key: &str| attrs.get(key).map(String::as_str).unwrap_or("");

        let default_mode = parse_request_permission(&request.permission)?;
        let translation = PathTranslation::parse(attr(attributes::PATH_TRANSLATION))?;
        let use_pod_identity = parse_bool_attribute(
            attributes::USE_POD_IDENTITY,
            attr(attributes::USE_POD_IDENTITY),
        )?;
        let preference = AddressPreference::parse_attribute(
            attr(attributes::PREFERRED_ADDRESS_TYPE),
            self.config.preferred_address_type,
        )?;

        let namespace = attr(attributes::POD_NAMESPACE);
        let pod_name = attr(attributes::POD_NAME);
        let service_account = attr(attributes::SERVICE_ACCOUNT_NAME);
        if !use_pod_identity && (namespace.is_empty() || service_account.is_empty()) {
            bail!("mount attributes are missing the pod namespace or service account name");
        }

        let objects = attr(attributes::OBJECTS);
        if objects.trim().is_empty() {
            bail!("mount attributes name no objects to fetch");
        }

        let regions = resolve_regions(
            attr(attributes::REGION),
            attr(attributes::FAILOVER_REGION),
            self.meta.as_ref(),
            namespace,
            pod_name,
        )
        .await?;
        info!(
            "Servicing mount for {}/{} in {:?}",
            namespace, pod_name, regions
        );

        let descriptors = parse_descriptors(
            objects,
            &regions,
            translation,
            default_mode,
            self.config.driver_writes_secrets,
        )?;

        let identity = resolve_identity(
            self.meta.as_ref(),
            namespace,
            service_account,
            use_pod_identity,
            preference,
        )
        .await?;
        let bundle = TokenBundle::parse(attr(attributes::SERVICE_ACCOUNT_TOKENS))?;
        let bound = self.bind_tokens(&request.target_path, &identity, &regions, &bundle)?;

        let clients = self.clients.region_clients(&bound).await?;
        if clients.is_empty() {
            bail!("no region produced usable credentials for this mount");
        }

        let prior = self.prior_versions(request);
        let parameter_backend = ParameterStoreBackend::new(&clients);
        let secrets_backend = SecretsManagerBackend::new(&clients);
        let (parameter_outcome, secrets_outcome) = futures::future::try_join(
            fetch_group(&parameter_backend, &descriptors.parameters, &prior),
            fetch_group(&secrets_backend, &descriptors.secrets, &prior),
        )
        .await?;

        let mut outcome = parameter_outcome;
        outcome.merge(secrets_outcome);
        let artifacts = derive_artifacts(
            &descriptors.parameters,
            &descriptors.secrets,
            outcome.artifacts,
        )?;

        let mut versions = outcome.versions;
        versions.sort_by_key(|record| record.index);
        let object_version: Vec<ObjectVersion> = versions
            .into_iter()
            .map(|record| ObjectVersion {
                id: record.id,
                version: record.version,
            })
            .collect();
        debug_assert_eq!(object_version.len(), descriptors.len());

        let files = if self.config.driver_writes_secrets {
            artifacts
                .into_iter()
                .map(|artifact| File {
                    path: artifact.file_name,
                    mode: mode_bits(artifact.mode),
                    contents: artifact.data,
                })
                .collect()
        } else {
            materialize::write_artifacts(Path::new(&request.target_path), &artifacts)?;
            Vec::new()
        };

        Ok(MountResponse {
            files,
            object_version,
        })
    }

    /// Attach a JWT to each region: the cache first, the request's token
    /// bundle on a miss.
    fn bind_tokens(
        &self,
        volume: &str,
        identity: &crate::auth::Identity,
        regions: &[String],
        bundle: &TokenBundle,
    ) -> Result<Vec<RegionIdentity>> {
        let audience = identity.audience();
        let mut bound = Vec::with_capacity(regions.len());
        for region in regions {
            let jwt = match self.token_cache.get(volume, region) {
                Ok(jwt) => jwt,
                Err(_) => {
                    let token = bundle.token_for(audience)?;
                    self.token_cache.insert(
                        volume,
                        region,
                        &token.token,
                        token.expiration_timestamp,
                    );
                    token.token.clone()
                }
            };
            bound.push(RegionIdentity {
                region: region.clone(),
                identity: identity.clone(),
                token: jwt,
            });
        }
        Ok(bound)
    }

    /// Rotation state from the previous mount, keyed by alias. When this
    /// process writes the files, an entry whose file vanished from the
    /// target directory is dropped so the value is fetched again instead
    /// of silently trusted.
    fn prior_versions(&self, request: &MountRequest) -> HashMap<String, String> {
        let mut prior: HashMap<String, String> = request
            .current_object_version
            .iter()
            .map(|v| (v.id.clone(), v.version.clone()))
            .collect();
        if !self.config.driver_writes_secrets {
            let target = Path::new(&request.target_path);
            prior.retain(|alias, _| target.join(alias).is_file());
        }
        prior
    }
}

/// Append JMESPath sub-artifacts to the fetched parents and order
/// everything by descriptor position.
fn derive_artifacts(
    parameters: &[SecretDescriptor],
    secrets: &[SecretDescriptor],
    mut artifacts: Vec<SecretArtifact>,
) -> Result<Vec<SecretArtifact>> {
    let by_index: HashMap<usize, &SecretDescriptor> = parameters
        .iter()
        .chain(secrets.iter())
        .map(|descriptor| (descriptor.index, descriptor))
        .collect();

    let mut derived = Vec::new();
    for artifact in &artifacts {
        let descriptor = by_index.get(&artifact.index).ok_or_else(|| {
            anyhow!("artifact {} has no matching descriptor", artifact.file_name)
        })?;
        derived.extend(extract::sub_artifacts(descriptor, artifact)?);
    }
    artifacts.extend(derived);
    artifacts.sort_by_key(|artifact| artifact.index);
    Ok(artifacts)
}

async fn fetch_group(
    backend: &dyn SecretBackend,
    descriptors: &[SecretDescriptor],
    prior: &HashMap<String, String>,
) -> Result<FetchOutcome> {
    if descriptors.is_empty() {
        return Ok(FetchOutcome::default());
    }
    backend.fetch(descriptors, prior).await
}

/// Parse the request-level default permission: a JSON-encoded mode value,
/// empty meaning the provider default.
fn parse_request_permission(raw: &str) -> Result<u32> {
    if raw.trim().is_empty() {
        return Ok(DEFAULT_FILE_MODE);
    }
    let mode: u32 = serde_json::from_str(raw.trim())
        .with_context(|| format!("invalid mount permission '{raw}'"))?;
    if mode > 0o777 {
        bail!("mount permission '{raw}' is outside the range 0 to 0777");
    }
    Ok(mode)
}

fn parse_bool_attribute(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" => Ok(false),
        "true" => Ok(true),
        other => Err(anyhow!("attribute {key} must be true or false, got '{other}'")),
    }
}

/// Truncate a mode to the permission bits the driver expects.
fn mode_bits(mode: u32) -> i32 {
    i32::try_from(mode & 0o777).unwrap_or(0o644)
}
