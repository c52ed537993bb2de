//! Error types for ouctl

use std::fmt;

use thiserror::Error;

/// Step of a portal deployment, used to tag orchestrator failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStage {
    /// Creating the portal and dashboard namespaces
    Namespaces,
    /// Labelling the portal namespace
    NamespaceLabels,
    /// Creating or updating the credential secret
    Credentials,
    /// Deploying charts that must exist before the portal
    PreCharts,
    /// Deploying the operator release
    Operator,
    /// Waiting on the operator workload
    OperatorReady,
    /// Removing a stale pre-check pod
    PrecheckCleanup,
    /// Deploying the core portal release
    CoreService,
    /// Waiting on the core portal workload
    CoreServiceReady,
    /// Deploying and waiting on the login portal
    LoginPortal,
    /// Deploying charts that run after the portal
    PostCharts,
}

impl fmt::Display for DeployStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployStage::Namespaces => "namespaces",
            DeployStage::NamespaceLabels => "namespace-labels",
            DeployStage::Credentials => "credentials",
            DeployStage::PreCharts => "pre-charts",
            DeployStage::Operator => "operator",
            DeployStage::OperatorReady => "operator-ready",
            DeployStage::PrecheckCleanup => "precheck-cleanup",
            DeployStage::CoreService => "orchestra",
            DeployStage::CoreServiceReady => "orchestra-ready",
            DeployStage::LoginPortal => "login-portal",
            DeployStage::PostCharts => "post-charts",
        };
        f.write_str(name)
    }
}

/// Main error type for ouctl operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A required configuration section or input is missing or malformed
    #[error("configuration error: {0}")]
    Configuration(String),

    /// None of the supported authentication sections is present
    #[error("configuration error: no authentication method configured (expected one of oidc, github, active_directory, saml)")]
    NoAuthenticationConfigured,

    /// A secret is required but was neither supplied nor already stored
    #[error("configuration error: missing required secret {key}: {hint}")]
    MissingRequiredSecret {
        /// Key inside the credential secret
        key: String,
        /// What the user should supply
        hint: String,
    },

    /// A context, CRD version or custom resource could not be found
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The installer or upgrader ran out of attempts
    #[error("deployment of release {release} failed after {attempts} attempts: {last_error}")]
    DeployFailed {
        /// Release that could not be deployed
        release: String,
        /// Number of attempts made
        attempts: u32,
        /// Error reported by the final attempt
        last_error: String,
    },

    /// A workload never reached its desired replica count
    #[error("timed out waiting for {namespace}/{workload} to become ready after {attempts} checks")]
    ReadinessTimeout {
        /// Namespace of the workload
        namespace: String,
        /// Workload name
        workload: String,
        /// Number of polls made
        attempts: u32,
    },

    /// A single package engine call failed
    #[error("helm error: {0}")]
    Engine(String),

    /// A cluster API call failed
    #[error("cluster error: {0}")]
    Cluster(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An orchestrator step failed
    #[error("deployment failed at stage {stage}: {source}")]
    Stage {
        /// The step that failed
        stage: DeployStage,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a resource-not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::ResourceNotFound(msg.into())
    }

    /// Create a package engine error with the given message
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Create a cluster API error with the given message
    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster(msg.into())
    }

    /// Create a missing-secret error
    pub fn missing_secret(key: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequiredSecret {
            key: key.into(),
            hint: hint.into(),
        }
    }

    /// Tag this error with the deployment stage it happened in
    pub fn at_stage(self, stage: DeployStage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Strip any stage wrappers and return the originating error
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage an orchestrator failure happened in, if any
    pub fn stage(&self) -> Option<DeployStage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Extension for tagging results with a [`DeployStage`]
pub trait StageExt<T> {
    /// Wrap the error in [`Error::Stage`]
    fn stage(self, stage: DeployStage) -> Result<T, Error>;
}

impl<T> StageExt<T> for Result<T, Error> {
    fn stage(self, stage: DeployStage) -> Result<T, Error> {
        self.map_err(|e| e.at_stage(stage))
    }
}
