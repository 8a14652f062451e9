//! # Secrets Manager Backend
//!
//! Per-secret fetch with rotation tracking. A descriptor that pins a
//! version id is fetched only when the caller's prior version differs;
//! otherwise the secret is described first and the stage map decides
//! whether the current version already matches the prior mount. Skipped
//! descriptors still emit their version record so the caller's rotation
//! state stays complete.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use tracing::debug;

use crate::constants::DEFAULT_VERSION_STAGE;
use crate::descriptor::SecretDescriptor;
use crate::error::ApiError;

use super::{
    run_with_failover, FetchOutcome, FetchedSecret, RegionClients, SecretArtifact, SecretBackend,
    SecretMetadata, SecretsManagerApi, VersionRecord,
};

/// Mount-scoped secrets manager backend over the per-region clients.
#[derive(Debug)]
pub struct SecretsManagerBackend<'a> {
    regions: &'a [RegionClients],
}

impl<'a> SecretsManagerBackend<'a> {
    #[must_use]
    pub fn new(regions: &'a [RegionClients]) -> Self {
        Self { regions }
    }

    async fn fetch_region(
        &self,
        region_idx: usize,
        descriptors: &[SecretDescriptor],
        prior: &HashMap<String, String>,
    ) -> Result<FetchOutcome> {
        let clients = &self.regions[region_idx];
        let mut outcome = FetchOutcome::default();

        for descriptor in descriptors {
            let secret_id = descriptor.name_for_region(region_idx);
            let prior_version = prior.get(&descriptor.alias).map(String::as_str);

            let resolved = match descriptor.object_version.as_deref() {
                Some(pin) => {
                    if prior_version == Some(pin) {
                        debug!(
                            "Secret {} already at pinned version {}, skipping fetch",
                            secret_id, pin
                        );
                        outcome.versions.push(VersionRecord {
                            index: descriptor.index,
                            id: descriptor.alias.clone(),
                            version: pin.to_string(),
                        });
                        continue;
                    }
                    self.get_value(clients, secret_id, Some(pin)).await?
                }
                None => {
                    let target = self
                        .resolve_stage_version(clients, descriptor, secret_id)
                        .await?;
                    if prior_version == Some(target.as_str()) {
                        debug!(
                            "Secret {} unchanged at version {}, skipping fetch",
                            secret_id, target
                        );
                        outcome.versions.push(VersionRecord {
                            index: descriptor.index,
                            id: descriptor.alias.clone(),
                            version: target,
                        });
                        continue;
                    }
                    self.get_value(clients, secret_id, Some(&target)).await?
                }
            };

            debug!(
                "Fetched secret {} version {} in {}",
                secret_id, resolved.version_id, clients.region
            );
            outcome.artifacts.push(SecretArtifact {
                index: descriptor.index,
                file_name: descriptor.alias.clone(),
                mode: descriptor.mode,
                data: resolved.data,
            });
            outcome.versions.push(VersionRecord {
                index: descriptor.index,
                id: descriptor.alias.clone(),
                version: resolved.version_id,
            });
        }
        Ok(outcome)
    }

    /// Describe the secret and resolve the version id the descriptor's
    /// stage (default `AWSCURRENT`) currently points at.
    async fn resolve_stage_version(
        &self,
        clients: &RegionClients,
        descriptor: &SecretDescriptor,
        secret_id: &str,
    ) -> Result<String> {
        let metadata: SecretMetadata = clients
            .secrets_manager
            .describe_secret(secret_id)
            .await
            .map_err(anyhow::Error::new)
            .with_context(|| format!("describing secret {secret_id}"))?;

        let stage = descriptor
            .version_stage
            .as_deref()
            .unwrap_or(DEFAULT_VERSION_STAGE);
        metadata
            .version_stages
            .iter()
            .find(|(_, stages)| stages.iter().any(|s| s == stage))
            .map(|(version_id, _)| version_id.clone())
            .ok_or_else(|| {
                ApiError::invalid_request(
                    "secretsmanager",
                    "DescribeSecret",
                    format!("secret {secret_id} has no version with stage {stage}"),
                )
                .into()
            })
    }

    async fn get_value(
        &self,
        clients: &RegionClients,
        secret_id: &str,
        version_id: Option<&str>,
    ) -> Result<FetchedSecret> {
        clients
            .secrets_manager
            .get_secret_value(secret_id, version_id, None)
            .await
            .map_err(anyhow::Error::new)
            .with_context(|| format!("fetching secret {secret_id}"))
    }
}

#[async_trait]
impl SecretBackend for SecretsManagerBackend<'_> {
    async fn fetch(
        &self,
        descriptors: &[SecretDescriptor],
        prior: &HashMap<String, String>,
    ) -> Result<FetchOutcome> {
        let regions: Vec<String> = self.regions.iter().map(|c| c.region.clone()).collect();
        run_with_failover("secrets manager", &regions, |region_idx| {
            self.fetch_region(region_idx, descriptors, prior)
        })
        .await
    }
}

/// [`SecretsManagerApi`] over the real Secrets Manager client.
#[derive(Debug)]
pub struct AwsSecretsManager {
    client: SecretsManagerClient,
}

impl AwsSecretsManager {
    #[must_use]
    pub fn new(client: SecretsManagerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretsManagerApi for AwsSecretsManager {
    async fn get_secret_value(
        &self,
        secret_id: &str,
        version_id: Option<&str>,
        version_stage: Option<&str>,
    ) -> Result<FetchedSecret, ApiError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .set_version_id(version_id.map(str::to_string))
            .set_version_stage(version_stage.map(str::to_string))
            .send()
            .await
            .map_err(|err| ApiError::from_sdk("secretsmanager", "GetSecretValue", err))?;

        // Binary payloads pass through unchanged; string payloads as UTF-8
        let data = match (response.secret_binary, response.secret_string) {
            (Some(blob), _) => blob.into_inner(),
            (None, Some(text)) => text.into_bytes(),
            (None, None) => {
                return Err(ApiError::invalid_request(
                    "secretsmanager",
                    "GetSecretValue",
                    format!("secret {secret_id} has no string or binary value"),
                ));
            }
        };
        Ok(FetchedSecret {
            data,
            version_id: response.version_id.unwrap_or_default(),
        })
    }

    async fn describe_secret(&self, secret_id: &str) -> Result<SecretMetadata, ApiError> {
        let response = self
            .client
            .describe_secret()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|err| ApiError::from_sdk("secretsmanager", "DescribeSecret", err))?;
        Ok(SecretMetadata {
            version_stages: response.version_ids_to_stages.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use crate::backend::testing::{
        fake_region, FakeParameterStore, FakeSecretVersion, FakeSecretsManager,
    };
    use crate::descriptor::{parse_descriptors, DescriptorSet, PathTranslation};

    fn region_clients(region: &str, secrets: Arc<FakeSecretsManager>) -> RegionClients {
        fake_region(region, Arc::new(FakeParameterStore::default()), secrets)
    }

    fn descriptors(yaml: &str, regions: &[&str]) -> DescriptorSet {
        let regions: Vec<String> = regions.iter().map(|r| (*r).to_string()).collect();
        parse_descriptors(yaml, &regions, PathTranslation::Char('_'), 0o644, false).unwrap()
    }

    fn prior(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_fresh_mount_fetches_current_version() {
        let secrets = Arc::new(FakeSecretsManager::with_current(&[(
            "TestSecret1",
            "secret1",
            "v1",
        )]));
        let clients = vec![region_clients("us-west-2", Arc::clone(&secrets))];
        let set = descriptors(
            "- objectName: TestSecret1\n  objectType: secretsmanager\n",
            &["us-west-2"],
        );

        let backend = SecretsManagerBackend::new(&clients);
        let outcome = backend.fetch(&set.secrets, &HashMap::new()).await.unwrap();
        assert_eq!(outcome.artifacts.len(), 1);
        assert_eq!(outcome.artifacts[0].data, b"secret1");
        assert_eq!(outcome.versions[0].version, "v1");
        assert_eq!(secrets.describe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secrets.get_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unchanged_secret_skips_get_value() {
        let secrets = Arc::new(FakeSecretsManager::with_current(&[(
            "TestSecret1",
            "secret1",
            "v1",
        )]));
        let clients = vec![region_clients("us-west-2", Arc::clone(&secrets))];
        let set = descriptors(
            "- objectName: TestSecret1\n  objectType: secretsmanager\n",
            &["us-west-2"],
        );

        let backend = SecretsManagerBackend::new(&clients);
        let outcome = backend
            .fetch(&set.secrets, &prior(&[("TestSecret1", "v1")]))
            .await
            .unwrap();
        // Version record still emitted, but no value was fetched
        assert!(outcome.artifacts.is_empty());
        assert_eq!(outcome.versions[0].version, "v1");
        assert_eq!(secrets.get_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rotated_secret_is_refetched() {
        let secrets = Arc::new(FakeSecretsManager {
            secrets: [(
                "TestSecret1".to_string(),
                vec![
                    FakeSecretVersion {
                        version_id: "v2".to_string(),
                        stages: vec!["AWSCURRENT".to_string()],
                        data: b"rotated".to_vec(),
                    },
                    FakeSecretVersion {
                        version_id: "v1".to_string(),
                        stages: vec!["AWSPREVIOUS".to_string()],
                        data: b"stale".to_vec(),
                    },
                ],
            )]
            .into_iter()
            .collect(),
            ..FakeSecretsManager::default()
        });
        let clients = vec![region_clients("us-west-2", Arc::clone(&secrets))];
        let set = descriptors(
            "- objectName: TestSecret1\n  objectType: secretsmanager\n",
            &["us-west-2"],
        );

        let backend = SecretsManagerBackend::new(&clients);
        let outcome = backend
            .fetch(&set.secrets, &prior(&[("TestSecret1", "v1")]))
            .await
            .unwrap();
        assert_eq!(outcome.artifacts[0].data, b"rotated");
        assert_eq!(outcome.versions[0].version, "v2");
    }

    #[tokio::test]
    async fn test_pinned_version_with_matching_prior_skips_backend_entirely() {
        let secrets = Arc::new(FakeSecretsManager::with_current(&[(
            "Pinned", "value", "v7",
        )]));
        let clients = vec![region_clients("us-west-2", Arc::clone(&secrets))];
        let set = descriptors(
            "- objectName: Pinned\n  objectType: secretsmanager\n  objectVersion: v7\n",
            &["us-west-2"],
        );

        let backend = SecretsManagerBackend::new(&clients);
        let outcome = backend
            .fetch(&set.secrets, &prior(&[("Pinned", "v7")]))
            .await
            .unwrap();
        assert!(outcome.artifacts.is_empty());
        assert_eq!(outcome.versions[0].version, "v7");
        assert_eq!(secrets.describe_calls.load(Ordering::SeqCst), 0);
        assert_eq!(secrets.get_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_version_stage_label_resolution() {
        let secrets = Arc::new(FakeSecretsManager {
            secrets: [(
                "Staged".to_string(),
                vec![
                    FakeSecretVersion {
                        version_id: "v-current".to_string(),
                        stages: vec!["AWSCURRENT".to_string()],
                        data: b"current".to_vec(),
                    },
                    FakeSecretVersion {
                        version_id: "v-pending".to_string(),
                        stages: vec!["AWSPENDING".to_string()],
                        data: b"pending".to_vec(),
                    },
                ],
            )]
            .into_iter()
            .collect(),
            ..FakeSecretsManager::default()
        });
        let clients = vec![region_clients("us-west-2", Arc::clone(&secrets))];
        let set = descriptors(
            "- objectName: Staged\n  objectType: secretsmanager\n  objectVersionLabel: AWSPENDING\n",
            &["us-west-2"],
        );

        let backend = SecretsManagerBackend::new(&clients);
        let outcome = backend.fetch(&set.secrets, &HashMap::new()).await.unwrap();
        assert_eq!(outcome.artifacts[0].data, b"pending");
        assert_eq!(outcome.versions[0].version, "v-pending");
    }

    #[tokio::test]
    async fn test_not_found_is_fatal_and_names_the_region() {
        let secrets = Arc::new(FakeSecretsManager::default());
        let clients = vec![
            region_clients("us-east-1", Arc::clone(&secrets)),
            region_clients("us-west-2", Arc::clone(&secrets)),
        ];
        let set = descriptors(
            "- objectName: Missing\n  objectType: secretsmanager\n",
            &["us-east-1", "us-west-2"],
        );

        let backend = SecretsManagerBackend::new(&clients);
        let err = backend.fetch(&set.secrets, &HashMap::new()).await.unwrap_err();
        let text = format!("{err:#}");
        assert!(text.starts_with("us-east-1:"), "got: {text}");
        // The secondary region was never consulted
        assert_eq!(secrets.describe_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backup_arn_used_in_failover_region() {
        let primary = Arc::new(FakeSecretsManager::default().failing_with(vec![
            ApiError::with_status("secretsmanager", "DescribeSecret", 500, "down"),
        ]));
        let secondary = Arc::new(FakeSecretsManager::with_current(&[(
            "arn:aws:secretsmanager:us-west-2:123456789012:secret:App-xyz",
            "west-value",
            "v9",
        )]));
        let clients = vec![
            region_clients("us-east-1", primary),
            region_clients("us-west-2", Arc::clone(&secondary)),
        ];
        let set = descriptors(
            "- objectName: App\n  objectType: secretsmanager\n  backupArn: arn:aws:secretsmanager:us-west-2:123456789012:secret:App-xyz\n",
            &["us-east-1", "us-west-2"],
        );

        let backend = SecretsManagerBackend::new(&clients);
        let outcome = backend.fetch(&set.secrets, &HashMap::new()).await.unwrap();
        assert_eq!(outcome.artifacts[0].data, b"west-value");
        // Artifact stays under the primary alias
        assert_eq!(outcome.artifacts[0].file_name, "App");
    }
}
