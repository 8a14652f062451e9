//! Shared test doubles for exercising the full mount pipeline without a
//! cluster or cloud account.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use secrets_store_provider_aws::backend::{
    ClientFactory, FetchedParameter, FetchedSecret, ParameterBatch, ParameterStoreApi,
    RegionClients, RegionIdentity, SecretMetadata, SecretsManagerApi,
};
use secrets_store_provider_aws::error::ApiError;
use secrets_store_provider_aws::k8s::WorkloadMeta;

/// Workload metadata with fixed answers.
pub struct StubMeta {
    pub role_arn: Option<String>,
    pub node_region: Option<String>,
}

impl Default for StubMeta {
    fn default() -> Self {
        Self {
            role_arn: Some("arn:aws:iam::123456789012:role/app".to_string()),
            node_region: None,
        }
    }
}

#[async_trait]
impl WorkloadMeta for StubMeta {
    async fn service_account_role_arn(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<String>> {
        Ok(self.role_arn.clone())
    }

    async fn node_region(&self, _namespace: &str, _pod_name: &str) -> Result<Option<String>> {
        Ok(self.node_region.clone())
    }
}

/// Scripted parameter store: name or selector → (value, version). Errors
/// queued with `fail_next` are returned before any lookup.
#[derive(Default)]
pub struct FakeParameterStore {
    pub values: Mutex<HashMap<String, (String, i64)>>,
    pub fail_next: Mutex<Vec<ApiError>>,
    pub calls: AtomicUsize,
}

impl FakeParameterStore {
    pub fn with_values(values: &[(&str, &str, i64)]) -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(
                values
                    .iter()
                    .map(|(k, v, ver)| ((*k).to_string(), ((*v).to_string(), *ver)))
                    .collect(),
            ),
            ..Self::default()
        })
    }

    pub fn fail_next(&self, errors: Vec<ApiError>) {
        *self.fail_next.lock().unwrap() = errors;
    }
}

#[async_trait]
impl ParameterStoreApi for FakeParameterStore {
    async fn get_parameters(&self, selectors: &[String]) -> Result<ParameterBatch, ApiError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(err) = self.fail_next.lock().unwrap().pop() {
            return Err(err);
        }
        let values = self.values.lock().unwrap();
        let mut batch = ParameterBatch::default();
        for selector in selectors {
            let name = selector.split(':').next().unwrap_or(selector);
            match values.get(selector).or_else(|| values.get(name)) {
                Some((value, version)) => batch.parameters.push(FetchedParameter {
                    name: name.to_string(),
                    arn: None,
                    value: value.clone(),
                    version: *version,
                }),
                None => batch.invalid.push(selector.clone()),
            }
        }
        Ok(batch)
    }
}

/// One scripted secret version.
#[derive(Debug, Clone)]
pub struct FakeSecretVersion {
    pub version_id: String,
    pub stages: Vec<String>,
    pub data: Vec<u8>,
}

/// Scripted secrets manager: secret id → versions.
#[derive(Default)]
pub struct FakeSecretsManager {
    pub secrets: Mutex<HashMap<String, Vec<FakeSecretVersion>>>,
    pub fail_next: Mutex<Vec<ApiError>>,
    pub get_calls: AtomicUsize,
    pub describe_calls: AtomicUsize,
}

impl FakeSecretsManager {
    pub fn with_current(secrets: &[(&str, &str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            secrets: Mutex::new(
                secrets
                    .iter()
                    .map(|(name, value, version)| {
                        (
                            (*name).to_string(),
                            vec![FakeSecretVersion {
                                version_id: (*version).to_string(),
                                stages: vec!["AWSCURRENT".to_string()],
                                data: value.as_bytes().to_vec(),
                            }],
                        )
                    })
                    .collect(),
            ),
            ..Self::default()
        })
    }

    pub fn fail_next(&self, errors: Vec<ApiError>) {
        *self.fail_next.lock().unwrap() = errors;
    }

    fn take_failure(&self) -> Option<ApiError> {
        self.fail_next.lock().unwrap().pop()
    }
}

#[async_trait]
impl SecretsManagerApi for FakeSecretsManager {
    async fn get_secret_value(
        &self,
        secret_id: &str,
        version_id: Option<&str>,
        version_stage: Option<&str>,
    ) -> Result<FetchedSecret, ApiError> {
        self.get_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let secrets = self.secrets.lock().unwrap();
        let versions = secrets.get(secret_id).ok_or_else(|| {
            ApiError::with_status("secretsmanager", "GetSecretValue", 400, "not found")
        })?;
        let stage = version_stage.unwrap_or("AWSCURRENT");
        let found = versions
            .iter()
            .find(|v| match version_id {
                Some(id) => v.version_id == id,
                None => v.stages.iter().any(|s| s == stage),
            })
            .ok_or_else(|| {
                ApiError::with_status("secretsmanager", "GetSecretValue", 400, "no such version")
            })?;
        Ok(FetchedSecret {
            data: found.data.clone(),
            version_id: found.version_id.clone(),
        })
    }

    async fn describe_secret(&self, secret_id: &str) -> Result<SecretMetadata, ApiError> {
        self.describe_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let secrets = self.secrets.lock().unwrap();
        let versions = secrets.get(secret_id).ok_or_else(|| {
            ApiError::with_status("secretsmanager", "DescribeSecret", 400, "not found")
        })?;
        Ok(SecretMetadata {
            version_stages: versions
                .iter()
                .map(|v| (v.version_id.clone(), v.stages.clone()))
                .collect(),
        })
    }
}

/// Client factory that hands out pre-built per-region fakes.
pub struct StaticClientFactory {
    pub clients: Vec<RegionClients>,
}

#[async_trait]
impl ClientFactory for StaticClientFactory {
    async fn region_clients(&self, identities: &[RegionIdentity]) -> Result<Vec<RegionClients>> {
        Ok(identities
            .iter()
            .filter_map(|bound| {
                self.clients
                    .iter()
                    .find(|clients| clients.region == bound.region)
                    .cloned()
            })
            .collect())
    }
}

/// A region over the two fakes.
pub fn fake_region(
    region: &str,
    parameters: Arc<FakeParameterStore>,
    secrets: Arc<FakeSecretsManager>,
) -> RegionClients {
    RegionClients {
        region: region.to_string(),
        parameter_store: parameters,
        secrets_manager: secrets,
    }
}

/// A token bundle carrying both recognized audiences.
pub fn token_bundle_json() -> String {
    serde_json::json!({
        "sts.amazonaws.com": {
            "token": "jwt-sts",
            "expirationTimestamp": "2099-01-01T00:00:00Z"
        },
        "pods.eks.amazonaws.com": {
            "token": "jwt-pod",
            "expirationTimestamp": "2099-01-01T00:00:00Z"
        }
    })
    .to_string()
}
