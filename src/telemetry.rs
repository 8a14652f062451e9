//! # Telemetry
//!
//! Structured logging setup for the provider process.

/// Initialize the tracing subscriber.
///
/// Honors `RUST_LOG` when set, defaulting to info-level output for this
/// crate. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secrets_store_provider_aws=info".into()),
        )
        .try_init();
}
