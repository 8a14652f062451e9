//! # Secrets Store Provider for AWS
//!
//! A secret-materialization plugin invoked by the secrets-store CSI driver
//! over its provider socket. On each mount it:
//!
//! 1. **Resolves regions** - from the request, the environment, or the
//!    label of the node the requesting pod runs on, with an optional
//!    failover region
//! 2. **Authenticates as the workload** - STS web identity role assumption
//!    or the node-local EKS pod identity agent, fed by the driver's
//!    service account token bundle
//! 3. **Fetches secrets** - batched SSM Parameter Store gets and
//!    rotation-aware Secrets Manager reads, failing over between regions
//!    on retryable errors only
//! 4. **Derives sub-values** - JMESPath extraction from JSON secrets
//! 5. **Materializes** - atomic per-file writes under the target path, or
//!    payloads handed back to the driver depending on the write mode
//!
//! The RPC transport itself stays in the embedding binary; this crate
//! exposes the service surface as [`server::ProviderService`].

pub mod arn;
pub mod auth;
pub mod backend;
pub mod config;
pub mod constants;
pub mod descriptor;
pub mod error;
pub mod extract;
pub mod k8s;
pub mod materialize;
pub mod region;
pub mod server;
pub mod telemetry;

pub use backend::ObjectVersion;
pub use config::ProviderConfig;
pub use server::{MountRequest, MountResponse, ProviderService, VersionResponse};
