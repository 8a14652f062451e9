//! # Role Assumption Flow
//!
//! Credentials via STS `AssumeRoleWithWebIdentity`, presenting the
//! workload's service account token as the web identity assertion. The SDK
//! drives refresh through [`ProvideCredentials`], so credentials renew on
//! expiry without provider-side bookkeeping.

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{self, error::CredentialsError, future, ProvideCredentials};
use aws_credential_types::Credentials;
use tracing::debug;

use crate::config::endpoint_url_override;
use crate::constants::ROLE_SESSION_NAME;

/// Build an STS client for one region, honoring endpoint overrides.
///
/// The web identity call is unsigned, so the client carries no credentials
/// of its own.
pub async fn sts_client(region: &str) -> aws_sdk_sts::Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .no_credentials();
    if let Some(url) = endpoint_url_override("STS") {
        debug!("Using STS endpoint override: {}", url);
        loader = loader.endpoint_url(url);
    }
    let sdk_config = loader.load().await;
    aws_sdk_sts::Client::new(&sdk_config)
}

/// Credentials provider that exchanges a service account JWT for temporary
/// role credentials.
pub struct StsWebIdentityProvider {
    client: aws_sdk_sts::Client,
    role_arn: String,
    token: String,
}

impl std::fmt::Debug for StsWebIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StsWebIdentityProvider")
            .field("role_arn", &self.role_arn)
            .finish_non_exhaustive()
    }
}

impl StsWebIdentityProvider {
    #[must_use]
    pub fn new(client: aws_sdk_sts::Client, role_arn: String, token: String) -> Self {
        Self {
            client,
            role_arn,
            token,
        }
    }

    async fn fetch(&self) -> provider::Result {
        let output = self
            .client
            .assume_role_with_web_identity()
            .role_arn(&self.role_arn)
            .role_session_name(ROLE_SESSION_NAME)
            .web_identity_token(&self.token)
            .send()
            .await
            .map_err(CredentialsError::provider_error)?;

        let credentials = output.credentials.ok_or_else(|| {
            CredentialsError::provider_error(format!(
                "STS returned no credentials for role {}",
                self.role_arn
            ))
        })?;
        let expiry = std::time::SystemTime::try_from(credentials.expiration)
            .map_err(CredentialsError::provider_error)?;

        debug!("Assumed role {} via web identity", self.role_arn);
        Ok(Credentials::new(
            credentials.access_key_id,
            credentials.secret_access_key,
            Some(credentials.session_token),
            Some(expiry),
            "AssumeRoleWithWebIdentity",
        ))
    }
}

impl ProvideCredentials for StsWebIdentityProvider {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new(self.fetch())
    }
}
