//! # ARN Parsing
//!
//! Minimal parsing of Amazon Resource Names, enough to derive the backend
//! service, validate the embedded region against the mount's region list,
//! and recover a resource name for file naming.

/// A parsed ARN of the form `arn:partition:service:region:account:resource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

impl Arn {
    /// Parse an ARN. Returns `None` for anything that is not an ARN, so
    /// callers can treat plain secret and parameter names uniformly.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.splitn(6, ':');
        let head = parts.next()?;
        if head != "arn" {
            return None;
        }
        let partition = parts.next()?.to_string();
        let service = parts.next()?.to_string();
        let region = parts.next()?.to_string();
        let account = parts.next()?.to_string();
        let resource = parts.next()?.to_string();
        if service.is_empty() || resource.is_empty() {
            return None;
        }
        Some(Self {
            partition,
            service,
            region,
            account,
            resource,
        })
    }

    /// Resource name usable as a default file name.
    ///
    /// Secrets Manager ARNs carry `secret:<name>`; SSM parameter ARNs carry
    /// `parameter<path>`. Anything else is returned verbatim.
    #[must_use]
    pub fn resource_name(&self) -> &str {
        match self.service.as_str() {
            "secretsmanager" => self
                .resource
                .strip_prefix("secret:")
                .unwrap_or(&self.resource),
            "ssm" => self
                .resource
                .strip_prefix("parameter")
                .unwrap_or(&self.resource),
            _ => &self.resource,
        }
    }
}
