//! # Pod Identity Agent Flow
//!
//! Credentials from the node-local EKS pod identity agent. The agent is
//! reached over plain HTTP on a link-local address; the workload's service
//! account token rides in the `Authorization` header and the agent answers
//! with a static credential triple.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use aws_credential_types::provider::{self, future, ProvideCredentials};
use aws_credential_types::Credentials;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::AddressPreference;
use crate::constants::{POD_IDENTITY_AGENT_IPV4, POD_IDENTITY_AGENT_IPV6};

/// Credential triple returned by the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentCredentials {
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,
    #[serde(rename = "Token")]
    pub token: String,
}

/// HTTP client for the node-local pod identity agent.
#[derive(Debug, Clone)]
pub struct PodIdentityAgentClient {
    http: reqwest::Client,
    ipv4_endpoint: String,
    ipv6_endpoint: String,
}

impl PodIdentityAgentClient {
    /// Client against the well-known link-local agent endpoints.
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_endpoints(
            timeout,
            POD_IDENTITY_AGENT_IPV4.to_string(),
            POD_IDENTITY_AGENT_IPV6.to_string(),
        )
    }

    /// Client against explicit endpoints. Tests point this at a local mock.
    pub fn with_endpoints(
        timeout: Duration,
        ipv4_endpoint: String,
        ipv6_endpoint: String,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build pod identity agent HTTP client")?;
        Ok(Self {
            http,
            ipv4_endpoint,
            ipv6_endpoint,
        })
    }

    /// Fetch credentials from the agent.
    ///
    /// On `auto`, the IPv4 endpoint is tried first and IPv6 is consulted
    /// only after a transport-level failure; an HTTP error status is final
    /// regardless of preference since the agent is local.
    pub async fn fetch_credentials(
        &self,
        token: &str,
        preference: AddressPreference,
    ) -> Result<AgentCredentials> {
        let ipv4 = self.ipv4_endpoint.as_str();
        let ipv6 = self.ipv6_endpoint.as_str();
        let endpoints: Vec<&str> = match preference {
            AddressPreference::Auto => vec![ipv4, ipv6],
            AddressPreference::Ipv4 => vec![ipv4],
            AddressPreference::Ipv6 => vec![ipv6],
        };

        let mut last_transport_error = None;
        for (attempt, endpoint) in endpoints.iter().enumerate() {
            let response = match self
                .http
                .get(*endpoint)
                .header(reqwest::header::AUTHORIZATION, token)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    if attempt + 1 < endpoints.len() {
                        warn!(
                            "Pod identity agent unreachable at {}, trying next endpoint: {}",
                            endpoint, err
                        );
                    }
                    last_transport_error = Some(err);
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow!(
                    "pod identity agent at {endpoint} returned {status}: {body}"
                ));
            }

            let credentials: AgentCredentials = response
                .json()
                .await
                .with_context(|| format!("Invalid pod identity agent response from {endpoint}"))?;
            if credentials.access_key_id.is_empty()
                || credentials.secret_access_key.is_empty()
                || credentials.token.is_empty()
            {
                return Err(anyhow!(
                    "pod identity agent at {endpoint} returned incomplete credentials"
                ));
            }
            debug!("Obtained pod identity credentials from {}", endpoint);
            return Ok(credentials);
        }

        Err(anyhow!(
            "pod identity agent unreachable on all endpoints: {}",
            last_transport_error
                .map_or_else(|| "no endpoint attempted".to_string(), |e| e.to_string())
        ))
    }
}

/// Credentials provider that re-invokes the agent on every request, so the
/// agent's own rotation shows through without provider-side caching.
pub struct AgentCredentialsProvider {
    client: PodIdentityAgentClient,
    token: String,
    preference: AddressPreference,
}

impl std::fmt::Debug for AgentCredentialsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCredentialsProvider")
            .field("preference", &self.preference)
            .finish_non_exhaustive()
    }
}

impl AgentCredentialsProvider {
    #[must_use]
    pub fn new(client: PodIdentityAgentClient, token: String, preference: AddressPreference) -> Self {
        Self {
            client,
            token,
            preference,
        }
    }

    async fn fetch(&self) -> provider::Result {
        let credentials = self
            .client
            .fetch_credentials(&self.token, self.preference)
            .await
            .map_err(provider::error::CredentialsError::provider_error)?;
        Ok(Credentials::new(
            credentials.access_key_id,
            credentials.secret_access_key,
            Some(credentials.token),
            None,
            "PodIdentityAgent",
        ))
    }
}

impl ProvideCredentials for AgentCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new(self.fetch())
    }
}
