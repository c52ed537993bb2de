//! Portal values documents
//!
//! A values document is the YAML file handed to every chart. It is kept in two
//! forms: the raw [`ValuesTree`], which is what charts receive and what gets
//! written back to disk, and [`PortalValues`], a typed view of the sections
//! ouctl itself makes decisions on. The typed view is rebuilt after every
//! mutation of the tree so a malformed section is rejected at one place.

mod merge;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::{Error, Result};

pub use merge::merge;

/// Raw values tree passed to charts
pub type ValuesTree = Mapping;

/// Default namespace of the Kubernetes dashboard
pub const DEFAULT_DASHBOARD_NAMESPACE: &str = "kubernetes-dashboard";

/// Authentication method configured for the portal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// OpenID Connect upstream identity provider
    Oidc,
    /// GitHub OAuth application
    Github,
    /// LDAP/Active Directory bind
    ActiveDirectory,
    /// SAML2 upstream identity provider
    Saml,
}

impl AuthMethod {
    /// Key in the credential secret holding this method's secret, if it needs one
    pub fn secret_key(&self) -> Option<&'static str> {
        match self {
            AuthMethod::Oidc => Some("OIDC_CLIENT_SECRET"),
            AuthMethod::Github => Some("GITHUB_SECRET_ID"),
            AuthMethod::ActiveDirectory => Some("AD_BIND_PASSWORD"),
            AuthMethod::Saml => None,
        }
    }

    /// Values section that selects this method
    pub fn section(&self) -> &'static str {
        match self {
            AuthMethod::Oidc => "oidc",
            AuthMethod::Github => "github",
            AuthMethod::ActiveDirectory => "active_directory",
            AuthMethod::Saml => "saml",
        }
    }
}

/// `network` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkValues {
    /// External host of the portal
    pub openunison_host: Option<String>,
    /// External host of the dashboard
    pub dashboard_host: Option<String>,
    /// External host of the management/API proxy
    pub api_server_host: Option<String>,
    /// Ingress implementation (nginx, istio, ...)
    pub ingress_type: Option<String>,
    /// Session timeout applied to SSO into the portal
    pub session_inactivity_timeout_seconds: Option<u64>,
}

/// `dashboard` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardValues {
    /// Whether the dashboard is integrated
    pub enabled: bool,
    /// Namespace the dashboard runs in
    pub namespace: String,
}

impl Default for DashboardValues {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: DEFAULT_DASHBOARD_NAMESPACE.to_string(),
        }
    }
}

/// `oidc` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct OidcValues {
    pub client_id: Option<String>,
    pub issuer: Option<String>,
    /// Inline client secret; a secret file takes precedence
    pub client_secret: Option<String>,
}

/// `github` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct GithubValues {
    pub client_id: Option<String>,
    /// Inline client secret; a secret file takes precedence
    pub client_secret: Option<String>,
}

/// `active_directory` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActiveDirectoryValues {
    pub host: Option<String>,
    pub bind_dn: Option<String>,
    /// Inline bind password; a secret file takes precedence
    pub bind_password: Option<String>,
}

/// `saml` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamlValues {
    pub idp_url: Option<String>,
    pub metadata_xml_b64: Option<String>,
}

/// One group-management setting under `openunison.naas.groups`
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct GroupManagement {
    pub enabled: bool,
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct NaasGroups {
    pub internal: GroupManagement,
    pub external: GroupManagement,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct NaasValues {
    pub groups: NaasGroups,
}

/// `openunison.management_proxy` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagementProxyValues {
    pub enabled: bool,
    /// Overrides `network.api_server_host` as the proxy's external host
    pub host: Option<String>,
}

/// `openunison.html` section (login portal)
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct HtmlValues {
    pub replicas: Option<i32>,
}

/// `openunison.control_plane` section, read on satellites
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlPlaneValues {
    /// Organization the satellite is registered under
    pub parent_org: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    /// Extra badges shown next to the cluster in the control-plane portal
    pub additional_badges: Vec<Value>,
}

/// `openunison` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenUnisonValues {
    pub replicas: Option<i32>,
    /// Self-service namespace provisioning (NaaS)
    pub enable_provisioning: bool,
    pub naas: NaasValues,
    /// Authorization group rules
    pub az_groups: Vec<Value>,
    pub management_proxy: ManagementProxyValues,
    pub html: HtmlValues,
    pub control_plane: ControlPlaneValues,
}

/// Entry of `trusted_certs`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TrustedCert {
    pub name: String,
    /// Base64 of the certificate
    pub pem_b64: String,
}

/// Typed view of a values document
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortalValues {
    pub k8s_cluster_name: Option<String>,
    pub network: NetworkValues,
    pub dashboard: DashboardValues,
    pub oidc: Option<OidcValues>,
    pub github: Option<GithubValues>,
    pub active_directory: Option<ActiveDirectoryValues>,
    pub saml: Option<SamlValues>,
    pub openunison: OpenUnisonValues,
    pub database: Option<Value>,
    pub smtp: Option<Value>,
    pub trusted_certs: Vec<TrustedCert>,
}

impl PortalValues {
    /// Build the typed view from a tree, rejecting malformed sections
    pub fn from_tree(tree: &ValuesTree) -> Result<Self> {
        let values: PortalValues = serde_yaml::from_value(Value::Mapping(tree.clone()))
            .map_err(|e| Error::configuration(format!("invalid values: {}", e)))?;
        values.validate()?;
        Ok(values)
    }

    fn validate(&self) -> Result<()> {
        if self.openunison.enable_provisioning {
            if self.database.is_none() {
                return Err(Error::configuration(
                    "openunison.enable_provisioning requires a database section",
                ));
            }
            if self.smtp.is_none() {
                return Err(Error::configuration(
                    "openunison.enable_provisioning requires an smtp section",
                ));
            }
        }
        Ok(())
    }

    /// Authentication method, probed as oidc, github, active_directory, saml
    pub fn auth_method(&self) -> Option<AuthMethod> {
        if self.oidc.is_some() {
            Some(AuthMethod::Oidc)
        } else if self.github.is_some() {
            Some(AuthMethod::Github)
        } else if self.active_directory.is_some() {
            Some(AuthMethod::ActiveDirectory)
        } else if self.saml.is_some() {
            Some(AuthMethod::Saml)
        } else {
            None
        }
    }

    /// Secret configured inline for the given method
    pub fn inline_secret(&self, method: AuthMethod) -> Option<&str> {
        let secret = match method {
            AuthMethod::Oidc => self.oidc.as_ref().and_then(|s| s.client_secret.as_deref()),
            AuthMethod::Github => self.github.as_ref().and_then(|s| s.client_secret.as_deref()),
            AuthMethod::ActiveDirectory => self
                .active_directory
                .as_ref()
                .and_then(|s| s.bind_password.as_deref()),
            AuthMethod::Saml => None,
        };
        secret.filter(|s| !s.is_empty())
    }

    /// Desired replicas of the core portal workload
    pub fn orchestra_replicas(&self) -> i32 {
        self.openunison.replicas.unwrap_or(1)
    }

    /// Desired replicas of the login portal workload
    pub fn login_portal_replicas(&self) -> i32 {
        self.openunison.html.replicas.unwrap_or(1)
    }

    /// Trusted certificate with the given name
    pub fn trusted_cert(&self, name: &str) -> Option<&TrustedCert> {
        self.trusted_certs.iter().find(|c| c.name == name)
    }
}

/// A values document loaded from disk
#[derive(Debug, Clone)]
pub struct ValuesDocument {
    path: PathBuf,
    tree: ValuesTree,
    values: PortalValues,
}

impl ValuesDocument {
    /// Read and validate a values document
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::configuration(format!("failed to read values {}: {}", path.display(), e))
        })?;
        Self::from_yaml(path, &content)
    }

    /// Parse a values document from YAML text
    pub fn from_yaml(path: impl Into<PathBuf>, content: &str) -> Result<Self> {
        let path = path.into();
        let parsed: Value = serde_yaml::from_str(content).map_err(|e| {
            Error::configuration(format!("failed to parse {}: {}", path.display(), e))
        })?;
        let tree = match parsed {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            _ => {
                return Err(Error::configuration(format!(
                    "{} must contain a mapping at the top level",
                    path.display()
                )))
            }
        };
        Self::from_tree(path, tree)
    }

    /// Wrap an existing tree
    pub fn from_tree(path: impl Into<PathBuf>, tree: ValuesTree) -> Result<Self> {
        let values = PortalValues::from_tree(&tree)?;
        Ok(Self {
            path: path.into(),
            tree,
            values,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tree(&self) -> &ValuesTree {
        &self.tree
    }

    pub fn values(&self) -> &PortalValues {
        &self.values
    }

    /// Merge `overlay` into the document and revalidate
    pub fn apply_overlay(&mut self, overlay: &ValuesTree) -> Result<()> {
        let merged = merge(&self.tree, overlay);
        self.values = PortalValues::from_tree(&merged)?;
        self.tree = merged;
        Ok(())
    }

    /// Replace a top-level key and revalidate
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let mut tree = self.tree.clone();
        tree.insert(Value::String(key.to_string()), value);
        self.values = PortalValues::from_tree(&tree)?;
        self.tree = tree;
        Ok(())
    }

    /// Drop `key` from the mapping at `section`, returning whether it was there
    pub fn remove_from(&mut self, section: &str, key: &str) -> Result<bool> {
        let mut tree = self.tree.clone();
        let removed = match tree.get_mut(section) {
            Some(Value::Mapping(m)) => m.remove(key).is_some(),
            _ => false,
        };
        if removed {
            self.values = PortalValues::from_tree(&tree)?;
            self.tree = tree;
        }
        Ok(removed)
    }

    /// Serialize the tree as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.tree)?)
    }

    /// Overwrite the document on disk
    pub async fn save(&self) -> Result<()> {
        tokio::fs::write(&self.path, self.to_yaml()?).await?;
        Ok(())
    }
}

/// Convert any serializable value into a values tree
pub fn to_tree<T: Serialize>(value: &T) -> Result<ValuesTree> {
    match serde_yaml::to_value(value)? {
        Value::Mapping(m) => Ok(m),
        other => Err(Error::configuration(format!(
            "expected a mapping, got {:?}",
            other
        ))),
    }
}

/// Single-key tree `{ key: value }`
pub fn section(key: &str, value: ValuesTree) -> ValuesTree {
    let mut tree = Mapping::new();
    tree.insert(Value::String(key.to_string()), Value::Mapping(value));
    tree
}
