//! # Constants
//!
//! Shared constants used throughout the provider.
//!
//! These values represent protocol-level defaults; the ones that are
//! operator-tunable are overridden via configuration flags or environment
//! variables where applicable.

/// Provider protocol version reported by the version call
pub const PROVIDER_API_VERSION: &str = "v1alpha1";

/// Audience of service account tokens used for STS web identity role assumption
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";

/// Audience of service account tokens presented to the EKS pod identity agent
pub const POD_IDENTITY_AUDIENCE: &str = "pods.eks.amazonaws.com";

/// Service account annotation carrying the IAM role to assume
pub const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

/// Well-known node label carrying the region the node runs in
pub const REGION_NODE_LABEL: &str = "topology.kubernetes.io/region";

/// Environment variable consulted when the mount request names no region
pub const REGION_ENV_VAR: &str = "AWS_REGION";

/// IPv4 endpoint of the node-local EKS pod identity agent
pub const POD_IDENTITY_AGENT_IPV4: &str = "http://169.254.170.23/v1/credentials";

/// IPv6 endpoint of the node-local EKS pod identity agent
pub const POD_IDENTITY_AGENT_IPV6: &str = "http://[fd00:ec2::23]/v1/credentials";

/// Default timeout for pod identity agent HTTP calls (milliseconds)
pub const DEFAULT_AGENT_TIMEOUT_MS: u64 = 500;

/// Session name used for STS AssumeRoleWithWebIdentity calls
pub const ROLE_SESSION_NAME: &str = "secrets-store-provider-aws";

/// Maximum number of parameter names per GetParameters request (service limit)
pub const PARAMETER_BATCH_SIZE: usize = 10;

/// Version stage resolved when a secret pins neither a version id nor a stage
pub const DEFAULT_VERSION_STAGE: &str = "AWSCURRENT";

/// Character substituted for path separators in derived file names
pub const DEFAULT_PATH_TRANSLATION: char = '_';

/// Upper bound on cached service account token lifetime (seconds)
pub const TOKEN_CACHE_MAX_TTL_SECS: u64 = 3600;

/// Default file mode applied when neither the request nor the descriptor sets one
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Mount attribute keys populated by the CSI driver
pub mod attributes {
    /// Namespace of the pod the volume is mounted into
    pub const POD_NAMESPACE: &str = "csi.storage.k8s.io/pod.namespace";
    /// Name of the pod the volume is mounted into
    pub const POD_NAME: &str = "csi.storage.k8s.io/pod.name";
    /// Service account the pod runs as
    pub const SERVICE_ACCOUNT_NAME: &str = "csi.storage.k8s.io/serviceAccount.name";
    /// JSON map of audience to service account token
    pub const SERVICE_ACCOUNT_TOKENS: &str = "csi.storage.k8s.io/serviceAccount.tokens";
    /// Explicit primary region
    pub const REGION: &str = "region";
    /// Explicit secondary region; must differ from the primary
    pub const FAILOVER_REGION: &str = "failoverRegion";
    /// Path separator substitution: single character, `False`, or empty
    pub const PATH_TRANSLATION: &str = "pathTranslation";
    /// YAML list of secret descriptors
    pub const OBJECTS: &str = "objects";
    /// Selects the pod identity agent flow instead of role assumption
    pub const USE_POD_IDENTITY: &str = "usePodIdentity";
    /// Agent endpoint preference: `auto`, `ipv4`, or `ipv6`
    pub const PREFERRED_ADDRESS_TYPE: &str = "preferredAddressType";
}
