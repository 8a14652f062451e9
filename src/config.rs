//! # Provider Configuration
//!
//! Process-level configuration parsed once at startup by the embedding
//! binary and read-only afterwards, plus the endpoint-override environment
//! variables honored when constructing cloud clients.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::constants::DEFAULT_AGENT_TIMEOUT_MS;

/// Master switch: when set to a truthy value, endpoint override variables
/// are ignored and clients use the service default endpoints.
const IGNORE_ENDPOINT_URLS_ENV: &str = "AWS_IGNORE_CONFIGURED_ENDPOINT_URLS";

/// Default endpoint override applied to every service unless a per-service
/// variable is set.
const ENDPOINT_URL_ENV: &str = "AWS_ENDPOINT_URL";

/// Which endpoint of the pod identity agent to try first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum AddressPreference {
    /// Try the IPv4 endpoint, fall back to IPv6 on transport failure
    #[default]
    Auto,
    /// IPv4 endpoint only
    Ipv4,
    /// IPv6 endpoint only
    Ipv6,
}

impl std::fmt::Display for AddressPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
        })
    }
}

impl AddressPreference {
    /// Parse a mount attribute value. Empty selects the process default.
    pub fn parse_attribute(value: &str, default: Self) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "auto" => Ok(Self::Auto),
            "ipv4" => Ok(Self::Ipv4),
            "ipv6" => Ok(Self::Ipv6),
            other => Err(anyhow::anyhow!(
                "preferredAddressType must be auto, ipv4 or ipv6, got '{other}'"
            )),
        }
    }
}

/// Provider process configuration.
///
/// Set once at startup and shared read-only across mounts.
#[derive(Debug, Clone, Parser)]
#[command(name = "secrets-store-provider-aws", version)]
pub struct ProviderConfig {
    /// Return secret payloads to the driver instead of writing files into
    /// the target directory
    #[arg(long, default_value_t = false)]
    pub driver_writes_secrets: bool,

    /// Timeout for pod identity agent HTTP calls, in milliseconds
    #[arg(long, default_value_t = DEFAULT_AGENT_TIMEOUT_MS)]
    pub agent_timeout_ms: u64,

    /// Default pod identity agent endpoint preference; mounts may override
    /// via the preferredAddressType attribute
    #[arg(long, value_enum, default_value_t = AddressPreference::Auto)]
    pub preferred_address_type: AddressPreference,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            driver_writes_secrets: false,
            agent_timeout_ms: DEFAULT_AGENT_TIMEOUT_MS,
            preferred_address_type: AddressPreference::Auto,
        }
    }
}

impl ProviderConfig {
    /// Agent HTTP timeout as a [`Duration`]
    #[must_use]
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }
}

/// Resolve the endpoint override for a service, if any.
///
/// Lookup order: the master ignore switch disables all overrides; then the
/// per-service variable `AWS_ENDPOINT_URL_<SERVICE>` (service name
/// upper-cased, non-alphanumerics folded to `_`); then the global
/// `AWS_ENDPOINT_URL`.
#[must_use]
pub fn endpoint_url_override(service: &str) -> Option<String> {
    let ignore = std::env::var(IGNORE_ENDPOINT_URLS_ENV)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if ignore {
        return None;
    }

    let suffix: String = service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    std::env::var(format!("{ENDPOINT_URL_ENV}_{suffix}"))
        .or_else(|_| std::env::var(ENDPOINT_URL_ENV))
        .ok()
        .filter(|url| !url.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_preference_parse() {
        assert_eq!(
            AddressPreference::parse_attribute("ipv4", AddressPreference::Auto).unwrap(),
            AddressPreference::Ipv4
        );
        assert_eq!(
            AddressPreference::parse_attribute("IPv6", AddressPreference::Auto).unwrap(),
            AddressPreference::Ipv6
        );
        // Empty falls back to the process default
        assert_eq!(
            AddressPreference::parse_attribute("", AddressPreference::Ipv6).unwrap(),
            AddressPreference::Ipv6
        );
        assert!(AddressPreference::parse_attribute("dual", AddressPreference::Auto).is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = ProviderConfig::default();
        assert!(!config.driver_writes_secrets);
        assert_eq!(config.agent_timeout(), Duration::from_millis(500));
        assert_eq!(config.preferred_address_type, AddressPreference::Auto);
    }
}
