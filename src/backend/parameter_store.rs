//! # Parameter Store Backend
//!
//! Batched fetch from SSM Parameter Store. Names are grouped into batches
//! of at most ten, every batch must resolve fully for a region to count as
//! successful, and names the service rejects (`invalidParameters`) are a
//! fatal failure rather than a reason to fail over.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_ssm::Client as SsmClient;
use tracing::{debug, warn};

use crate::constants::PARAMETER_BATCH_SIZE;
use crate::descriptor::SecretDescriptor;
use crate::error::ApiError;

use super::{
    run_with_failover, FetchOutcome, FetchedParameter, ParameterBatch, ParameterStoreApi,
    RegionClients, SecretArtifact, SecretBackend, VersionRecord,
};

/// Mount-scoped parameter store backend over the per-region clients.
#[derive(Debug)]
pub struct ParameterStoreBackend<'a> {
    regions: &'a [RegionClients],
}

impl<'a> ParameterStoreBackend<'a> {
    #[must_use]
    pub fn new(regions: &'a [RegionClients]) -> Self {
        Self { regions }
    }

    /// Fetch selector for one descriptor in one region: plain name, or
    /// `name:version` / `name:label` when the view pins one.
    fn selector(descriptor: &SecretDescriptor, region_idx: usize) -> String {
        let name = descriptor.name_for_region(region_idx);
        if let Some(version) = descriptor.version_for_region(region_idx) {
            return format!("{name}:{version}");
        }
        if let Some(stage) = descriptor.version_stage.as_deref() {
            return format!("{name}:{stage}");
        }
        name.to_string()
    }

    async fn fetch_region(
        &self,
        region_idx: usize,
        descriptors: &[SecretDescriptor],
    ) -> Result<FetchOutcome> {
        let clients = &self.regions[region_idx];
        let selectors: Vec<String> = descriptors
            .iter()
            .map(|descriptor| Self::selector(descriptor, region_idx))
            .collect();

        let mut by_name: HashMap<String, FetchedParameter> = HashMap::new();
        let mut by_arn: HashMap<String, FetchedParameter> = HashMap::new();
        let mut invalid: Vec<String> = Vec::new();

        for batch in selectors.chunks(PARAMETER_BATCH_SIZE) {
            let response = self.get_batch(clients, batch).await?;
            invalid.extend(response.invalid);
            for parameter in response.parameters {
                if let Some(arn) = &parameter.arn {
                    by_arn.insert(arn.clone(), parameter.clone());
                }
                by_name.insert(parameter.name.clone(), parameter);
            }
        }

        if !invalid.is_empty() {
            invalid.sort();
            return Err(ApiError::invalid_request(
                "ssm",
                "GetParameters",
                format!("invalid parameters: {}", invalid.join(", ")),
            )
            .into());
        }

        let mut outcome = FetchOutcome::default();
        for descriptor in descriptors {
            let name = descriptor.name_for_region(region_idx);
            let parameter = by_name
                .get(name)
                .or_else(|| by_arn.get(name))
                // GetParameters answers ARN selectors with the plain name
                .or_else(|| {
                    crate::arn::Arn::parse(name).and_then(|arn| by_name.get(arn.resource_name()))
                })
                .ok_or_else(|| {
                    ApiError::invalid_request(
                        "ssm",
                        "GetParameters",
                        format!("parameter {name} missing from batch response"),
                    )
                })?;

            debug!(
                "Fetched parameter {} version {} in {}",
                name, parameter.version, clients.region
            );
            outcome.artifacts.push(SecretArtifact {
                index: descriptor.index,
                file_name: descriptor.alias.clone(),
                mode: descriptor.mode,
                data: parameter.value.clone().into_bytes(),
            });
            outcome.versions.push(VersionRecord {
                index: descriptor.index,
                id: descriptor.alias.clone(),
                version: parameter.version.to_string(),
            });
        }
        Ok(outcome)
    }

    /// One batch call with a single retry when the whole batch fails
    /// retryably; the credentials provider refreshes between attempts.
    async fn get_batch(
        &self,
        clients: &RegionClients,
        batch: &[String],
    ) -> Result<ParameterBatch> {
        match clients.parameter_store.get_parameters(batch).await {
            Ok(response) => Ok(response),
            Err(err) if err.is_client_error() => {
                Err(anyhow::Error::new(err).context("parameter batch rejected"))
            }
            Err(err) => {
                warn!(
                    "Parameter batch failed retryably in {}, retrying once: {}",
                    clients.region, err
                );
                clients
                    .parameter_store
                    .get_parameters(batch)
                    .await
                    .map_err(anyhow::Error::new)
                    .context("parameter batch failed after retry")
            }
        }
    }
}

#[async_trait]
impl SecretBackend for ParameterStoreBackend<'_> {
    async fn fetch(
        &self,
        descriptors: &[SecretDescriptor],
        _prior: &HashMap<String, String>,
    ) -> Result<FetchOutcome> {
        let regions: Vec<String> = self.regions.iter().map(|c| c.region.clone()).collect();
        run_with_failover("parameter store", &regions, |region_idx| {
            self.fetch_region(region_idx, descriptors)
        })
        .await
    }
}

/// [`ParameterStoreApi`] over the real SSM client.
#[derive(Debug)]
pub struct AwsParameterStore {
    client: SsmClient,
}

impl AwsParameterStore {
    #[must_use]
    pub fn new(client: SsmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ParameterStoreApi for AwsParameterStore {
    async fn get_parameters(&self, selectors: &[String]) -> Result<ParameterBatch, ApiError> {
        let response = self
            .client
            .get_parameters()
            .set_names(Some(selectors.to_vec()))
            .with_decryption(true)
            .send()
            .await
            .map_err(|err| ApiError::from_sdk("ssm", "GetParameters", err))?;

        let parameters = response
            .parameters
            .unwrap_or_default()
            .into_iter()
            .filter_map(|parameter| {
                let name = parameter.name?;
                let value = parameter.value?;
                Some(FetchedParameter {
                    name,
                    arn: parameter.arn,
                    value,
                    version: parameter.version,
                })
            })
            .collect();
        Ok(ParameterBatch {
            parameters,
            invalid: response.invalid_parameters.unwrap_or_default(),
        })
    }
}
