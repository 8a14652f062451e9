//! # Workload Identity
//!
//! Turns the requesting workload (namespace, service account, pod) plus the
//! CSI-provided token bundle into AWS credentials providers, one per mount
//! region. Two flows produce the same contract:
//!
//! - **Role assumption** — the service account's annotated IAM role is
//!   assumed via STS with the `sts.amazonaws.com` audience token.
//! - **Pod identity agent** — the node-local agent exchanges the
//!   `pods.eks.amazonaws.com` audience token for static credentials.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::AddressPreference;
use crate::constants::{POD_IDENTITY_AUDIENCE, STS_AUDIENCE};
use crate::k8s::WorkloadMeta;

pub mod agent;
pub mod role;
pub mod token_cache;

pub use agent::{AgentCredentialsProvider, PodIdentityAgentClient};
pub use role::StsWebIdentityProvider;
pub use token_cache::TokenCache;

/// One service account token from the CSI token bundle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountToken {
    pub token: String,
    pub expiration_timestamp: DateTime<Utc>,
}

/// The audience-keyed token bundle the driver sends with each mount.
#[derive(Debug, Clone)]
pub struct TokenBundle {
    tokens: HashMap<String, ServiceAccountToken>,
}

impl TokenBundle {
    /// Parse the `serviceAccount.tokens` attribute (JSON).
    pub fn parse(raw: &str) -> Result<Self> {
        let tokens: HashMap<String, ServiceAccountToken> =
            serde_json::from_str(raw).context("Invalid service account token bundle")?;
        Ok(Self { tokens })
    }

    /// Token for the given audience. A missing audience is a fatal input
    /// error: the kubelet was not configured to issue it.
    pub fn token_for(&self, audience: &str) -> Result<&ServiceAccountToken> {
        self.tokens.get(audience).ok_or_else(|| {
            anyhow!("no service account token issued for audience {audience}; check the driver's token request configuration")
        })
    }
}

/// The identity flow selected for a mount.
///
/// Carries everything except the JWT itself, which is attached per region
/// from the token cache or bundle.
#[derive(Debug, Clone)]
pub enum Identity {
    /// Assume the given role via STS web identity
    Role { role_arn: String },
    /// Ask the node-local pod identity agent
    Agent { preference: AddressPreference },
}

impl Identity {
    /// Audience of the token this flow presents.
    #[must_use]
    pub fn audience(&self) -> &'static str {
        match self {
            Self::Role { .. } => STS_AUDIENCE,
            Self::Agent { .. } => POD_IDENTITY_AUDIENCE,
        }
    }
}

/// Select the identity flow for a mount.
///
/// The role flow requires an IAM role annotated on the workload's service
/// account; its absence is a non-retryable error.
pub async fn resolve_identity(
    meta: &dyn WorkloadMeta,
    namespace: &str,
    service_account: &str,
    use_pod_identity: bool,
    preference: AddressPreference,
) -> Result<Identity> {
    if use_pod_identity {
        return Ok(Identity::Agent { preference });
    }

    let role_arn = meta
        .service_account_role_arn(namespace, service_account)
        .await?
        .filter(|arn| !arn.is_empty())
        .ok_or_else(|| {
            anyhow!(
                "an IAM role must be associated with service account {service_account} (namespace: {namespace})"
            )
        })?;
    Ok(Identity::Role { role_arn })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubMeta {
        role_arn: Option<String>,
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
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_role_flow_requires_annotation() {
        let meta = StubMeta { role_arn: None };
        let err = resolve_identity(&meta, "default", "app-sa", false, AddressPreference::Auto)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("IAM role"));
    }

    #[tokio::test]
    async fn test_role_flow_uses_annotated_role() {
        let meta = StubMeta {
            role_arn: Some("arn:aws:iam::123456789012:role/app".to_string()),
        };
        let identity = resolve_identity(&meta, "default", "app-sa", false, AddressPreference::Auto)
            .await
            .unwrap();
        match identity {
            Identity::Role { role_arn } => {
                assert_eq!(role_arn, "arn:aws:iam::123456789012:role/app");
            }
            Identity::Agent { .. } => panic!("expected role identity"),
        }
        assert_eq!(
            resolve_identity(&meta, "default", "app-sa", false, AddressPreference::Auto)
                .await
                .unwrap()
                .audience(),
            STS_AUDIENCE
        );
    }

    #[tokio::test]
    async fn test_pod_identity_flow_skips_role_lookup() {
        let meta = StubMeta { role_arn: None };
        let identity = resolve_identity(&meta, "default", "app-sa", true, AddressPreference::Ipv6)
            .await
            .unwrap();
        match identity {
            Identity::Agent { preference } => assert_eq!(preference, AddressPreference::Ipv6),
            Identity::Role { .. } => panic!("expected agent identity"),
        }
        assert_eq!(identity_audience_for_agent(), POD_IDENTITY_AUDIENCE);
    }

    fn identity_audience_for_agent() -> &'static str {
        Identity::Agent {
            preference: AddressPreference::Auto,
        }
        .audience()
    }

    #[test]
    fn test_token_bundle_parse_and_lookup() {
        let raw = r#"{
            "sts.amazonaws.com": {
                "token": "jwt-sts",
                "expirationTimestamp": "2030-01-01T00:00:00Z"
            }
        }"#;
        let bundle = TokenBundle::parse(raw).unwrap();
        assert_eq!(bundle.token_for(STS_AUDIENCE).unwrap().token, "jwt-sts");
        assert!(bundle.token_for(POD_IDENTITY_AUDIENCE).is_err());
    }
}
