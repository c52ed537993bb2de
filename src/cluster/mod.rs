//! Kubernetes API access
//!
//! Everything ouctl needs from the API server goes through [`ClusterApi`]. A
//! value implementing it is bound to exactly one kubeconfig context for its
//! whole lifetime, so code that talks to two clusters holds two handles rather
//! than switching a shared current context back and forth.

mod client;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

pub use client::{KubeCluster, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};

/// Secret payload keyed by data key
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Observed state of a Deployment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadStatus {
    /// `status.readyReplicas`, zero when unset
    pub ready_replicas: i32,
    /// Label selector of the workload's pods in list-filter syntax
    pub selector: String,
}

/// Identifies a custom resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomResourceType {
    pub group: String,
    pub kind: String,
    pub plural: String,
}

impl CustomResourceType {
    /// Name of the CRD object defining this type (`plural.group`)
    pub fn crd_name(&self) -> String {
        format!("{}.{}", self.plural, self.group)
    }
}

impl fmt::Display for CustomResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.crd_name())
    }
}

/// Cluster operations used by the orchestrator and the federation protocol.
///
/// Lookups that can legitimately miss return `Ok(None)`; every other failure
/// is an error. Callers rely on that split to never regenerate a secret that
/// merely failed to load.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Name of the kubeconfig context this handle is bound to
    fn context(&self) -> &str;

    /// Create the namespace if it does not exist
    async fn ensure_namespace(&self, name: &str) -> Result<()>;

    /// Add labels to an existing namespace
    async fn label_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()>;

    /// Fetch a secret's data, `None` if the secret does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>>;

    /// Create a new secret
    async fn create_secret(&self, namespace: &str, name: &str, data: &SecretData) -> Result<()>;

    /// Replace the data of an existing secret
    async fn update_secret(&self, namespace: &str, name: &str, data: &SecretData) -> Result<()>;

    /// Read a Deployment's ready count and pod selector
    async fn workload_status(&self, namespace: &str, name: &str) -> Result<WorkloadStatus>;

    /// Count pods matching a label selector
    async fn count_pods(&self, namespace: &str, selector: &str) -> Result<usize>;

    /// Names of the pods matching a label selector, oldest first
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>>;

    /// Delete a pod; a pod that is already gone is not an error
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Full log of a pod's (single) container
    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String>;

    /// Version of a CRD that is both served and stored, `None` if the CRD is
    /// missing or no version qualifies
    async fn served_stored_version(&self, crd_name: &str) -> Result<Option<String>>;

    /// Fetch a custom resource as JSON, `None` if it does not exist
    async fn get_custom_resource(
        &self,
        resource: &CustomResourceType,
        version: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>>;
}

/// Render a label map as a selector string
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse `name=value` pairs as given on the command line
pub fn parse_labels<S: AsRef<str>>(pairs: &[S]) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (name, value) = pair.split_once('=').ok_or_else(|| {
            crate::Error::configuration(format!("label '{}' must be name=value", pair))
        })?;
        if name.is_empty() {
            return Err(crate::Error::configuration(format!(
                "label '{}' has an empty name",
                pair
            )));
        }
        labels.insert(name.to_string(), value.to_string());
    }
    Ok(labels)
}
