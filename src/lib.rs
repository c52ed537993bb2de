//! ouctl - installer and federation tool for the OpenUnison identity portal
//!
//! ouctl deploys the portal into a Kubernetes cluster by sequencing helm
//! releases and API calls, upgrades it in place on later runs, and federates
//! satellite clusters with a control-plane portal acting as their identity
//! provider.
//!
//! # Architecture
//!
//! Every cluster is reached through two handles bound to one kubeconfig context:
//! a [`cluster::ClusterApi`] for the API server and a [`helm::PackageEngine`]
//! for releases. Operations take those handles explicitly, so a federation run
//! holds one pair per cluster and never switches a shared current context.
//!
//! # Modules
//!
//! - [`values`] - Values documents, typed view and deep merge
//! - [`cluster`] - Kubernetes API access
//! - [`helm`] - Helm release operations and chart references
//! - [`retry`] - Bounded fixed-delay retry policy
//! - [`credentials`] - Credential secret provisioning
//! - [`deploy`] - Portal deployment orchestrator, installer and readiness poller
//! - [`satellite`] - Satellite federation with a control-plane portal
//! - [`error`] - Error types

pub mod cluster;
pub mod credentials;
pub mod deploy;
pub mod error;
pub mod helm;
pub mod retry;
pub mod satellite;
pub mod values;

#[cfg(test)]
mod testing;

pub use error::{DeployStage, Error};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Namespace the portal is deployed into
pub const DEFAULT_NAMESPACE: &str = "openunison";

/// Name of the credential secret in the portal namespace
pub const CREDENTIALS_SECRET_NAME: &str = "orchestra-secrets-source";

/// Release name of the operator
pub const OPERATOR_RELEASE: &str = "openunison-operator";

/// Release name of the core portal
pub const ORCHESTRA_RELEASE: &str = "orchestra";

/// Release name of the login portal
pub const LOGIN_PORTAL_RELEASE: &str = "orchestra-login-portal";

/// Default chart of the operator
pub const DEFAULT_OPERATOR_CHART: &str = "tremolo/openunison-operator";

/// Default chart of the core portal
pub const DEFAULT_ORCHESTRA_CHART: &str = "tremolo/orchestra";

/// Default chart of the login portal
pub const DEFAULT_LOGIN_PORTAL_CHART: &str = "tremolo/orchestra-login-portal";

/// Default chart registering a satellite with the control plane
pub const DEFAULT_ADD_CLUSTER_CHART: &str = "tremolo/openunison-k8s-add-cluster";

/// Length of generated passwords and shared secrets
pub const GENERATED_SECRET_LENGTH: usize = 64;
