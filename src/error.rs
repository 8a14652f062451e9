//! # Error Classification
//!
//! The single source of truth for the fatal / retryable split that gates
//! region failover.
//!
//! Every cloud API failure is converted into an [`ApiError`] carrying the
//! HTTP status class of the service response. The classifier walks an
//! error's causal chain looking for an [`ApiError`] whose status falls in
//! the client range `[400, 500)`; such errors are *fatal* and short-circuit
//! failover. Everything else (5xx, timeouts, transport failures, chains
//! with no API-origin cause) is *retryable* and lets the next region be
//! consulted.

use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use thiserror::Error;

/// Error codes that mark a response as client-caused even when the raw
/// HTTP response was lost on the way up.
const CLIENT_ERROR_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "ParameterNotFound",
    "ParameterVersionNotFound",
    "AccessDeniedException",
    "AccessDenied",
    "ValidationException",
    "InvalidParameterException",
    "InvalidRequestException",
    "DecryptionFailure",
    "ExpiredTokenException",
];

/// A failure reported by a cloud service API.
///
/// `status` is the HTTP status of the service response when one was
/// received; transport-level failures carry `None` and classify as
/// retryable.
#[derive(Debug, Error)]
#[error("{service} {operation} failed: {message}")]
pub struct ApiError {
    /// Service that produced the failure (for log and error text)
    pub service: &'static str,
    /// API operation that failed
    pub operation: &'static str,
    /// Modeled error code, when the service returned one
    pub code: Option<String>,
    /// HTTP status of the service response, when one was received
    pub status: Option<u16>,
    /// Human-readable failure description
    pub message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ApiError {
    /// Build an [`ApiError`] from an AWS SDK operation failure.
    ///
    /// The status is taken from the raw HTTP response when present. Modeled
    /// not-found / access-denied errors whose raw response was discarded by
    /// the SDK still classify as client errors via their error code.
    pub fn from_sdk<E>(
        service: &'static str,
        operation: &'static str,
        err: SdkError<E, HttpResponse>,
    ) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let code = err.code().map(str::to_string);
        let mut status = err.raw_response().map(|r| r.status().as_u16());
        if status.is_none() {
            if let Some(c) = code.as_deref() {
                if CLIENT_ERROR_CODES.contains(&c) {
                    status = Some(400);
                }
            }
        }
        let message = err
            .message()
            .map_or_else(|| err.to_string(), str::to_string);
        Self {
            service,
            operation,
            code,
            status,
            message,
            source: Some(Box::new(err)),
        }
    }

    /// Build a client-class (status 400) error for conditions the service
    /// reports in-band rather than through an HTTP failure, such as the
    /// parameter store's `invalidParameters` list.
    pub fn invalid_request(
        service: &'static str,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service,
            operation,
            code: Some("ValidationException".to_string()),
            status: Some(400),
            message: message.into(),
            source: None,
        }
    }

    /// Build an error carrying an explicit HTTP status. Used by in-memory
    /// test doubles standing in for the cloud services.
    pub fn with_status(
        service: &'static str,
        operation: &'static str,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service,
            operation,
            code: None,
            status: Some(status),
            message: message.into(),
            source: None,
        }
    }

    /// Build a retryable (no status) error for transport-level failures.
    pub fn transport(
        service: &'static str,
        operation: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            service,
            operation,
            code: None,
            status: None,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error alone is client-class.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status.is_some_and(|s| (400..500).contains(&s))
    }
}

/// Decide whether an error is fatal for failover purposes.
///
/// Fatal iff some cause in the chain is an [`ApiError`] with a client-class
/// HTTP status. An empty or API-free chain is retryable.
#[must_use]
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<ApiError>().is_some_and(ApiError::is_client_error))
}
