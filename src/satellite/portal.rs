//! What a satellite needs to know about the control-plane portal
//!
//! The control-plane portal is described by its `OpenUnison` custom resource.
//! Only a few fields matter for federation: the portal host, the namespace
//! management (NaaS) settings, and the certificate satellites must trust.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::cluster::{ClusterApi, CustomResourceType};
use crate::{Error, Result};

pub const OPENUNISON_GROUP: &str = "openunison.tremolo.io";
pub const OPENUNISON_KIND: &str = "OpenUnison";
pub const OPENUNISON_PLURAL: &str = "openunisons";
/// Name of the portal's `OpenUnison` resource created by the orchestra chart
pub const DEFAULT_PORTAL_RESOURCE: &str = "orchestra";
/// Secret holding the portal's TLS certificate
pub const TLS_CERTIFICATE_SECRET: &str = "ou-tls-certificate";
/// Key pair / trusted certificate name of the portal CA
pub const PORTAL_CA_NAME: &str = "unison-ca";

const HOST_ENV_VAR: &str = "OU_HOST";
/// Key of the certificate in `ou-tls-certificate` unless configured otherwise
pub const DEFAULT_CERT_KEY: &str = "tls.crt";

/// The `OpenUnison` custom resource type
pub fn openunison_resource() -> CustomResourceType {
    CustomResourceType {
        group: OPENUNISON_GROUP.to_string(),
        kind: OPENUNISON_KIND.to_string(),
        plural: OPENUNISON_PLURAL.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OpenUnisonObject {
    spec: OpenUnisonSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OpenUnisonSpec {
    hosts: Vec<HostSpec>,
    non_secret_data: Vec<NameValue>,
    key_store: KeyStore,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HostSpec {
    names: Vec<HostName>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HostName {
    name: String,
    env_var: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NameValue {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeyStore {
    key_pairs: KeyPairs,
    trusted_certificates: Vec<TrustedCertificate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeyPairs {
    keys: Vec<KeyPair>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeyPair {
    name: String,
    create_data: Option<CreateData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreateData {
    secret_info: Option<SecretInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SecretInfo {
    cert_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TrustedCertificate {
    name: String,
    pem_data: String,
}

/// Group management setting published by the control plane
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSetting {
    pub enabled: bool,
    pub suffix: Option<String>,
}

/// Where the certificate satellites must trust comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustSource {
    /// The operator generates the CA into `ou-tls-certificate`
    GeneratedCa { cert_key: String },
    /// The CA is configured as a trusted certificate, base64 PEM
    Configured { pem_b64: String },
}

/// Federation-relevant view of the control-plane portal
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPlanePortal {
    pub host: String,
    pub provisioning_enabled: bool,
    pub internal_groups: GroupSetting,
    pub external_groups: GroupSetting,
    /// Default groups followed by roles, as published
    pub default_groups: Vec<Value>,
    pub trust: Option<TrustSource>,
}

impl ControlPlanePortal {
    /// Extract the view from an `OpenUnison` object
    pub fn from_resource(object: &Value) -> Result<Self> {
        let object: OpenUnisonObject = serde_json::from_value(object.clone())
            .map_err(|e| Error::configuration(format!("malformed OpenUnison resource: {}", e)))?;
        let spec = object.spec;

        let host = spec
            .hosts
            .iter()
            .flat_map(|h| h.names.iter())
            .find(|n| n.env_var.as_deref() == Some(HOST_ENV_VAR))
            .map(|n| n.name.clone())
            .ok_or_else(|| {
                Error::configuration(format!(
                    "OpenUnison resource has no host bound to {}",
                    HOST_ENV_VAR
                ))
            })?;

        let data = spec.non_secret_data.as_slice();
        let group = |prefix: &str| GroupSetting {
            enabled: flag(data, format!("{}_ENABLED", prefix).as_str()),
            suffix: lookup(data, format!("{}_SUFFIX", prefix).as_str()).map(str::to_string),
        };

        let mut default_groups =
            decode_list("NAAS_DEFAULT_GROUPS", lookup(data, "NAAS_DEFAULT_GROUPS"))?;
        default_groups.extend(decode_list("NAAS_ROLES", lookup(data, "NAAS_ROLES"))?);

        let generated_ca = spec
            .key_store
            .key_pairs
            .keys
            .iter()
            .find(|k| k.name == PORTAL_CA_NAME)
            .and_then(|k| k.create_data.as_ref());
        let trust = match generated_ca {
            Some(create) => Some(TrustSource::GeneratedCa {
                cert_key: create
                    .secret_info
                    .as_ref()
                    .and_then(|s| s.cert_name.clone())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| DEFAULT_CERT_KEY.to_string()),
            }),
            None => spec
                .key_store
                .trusted_certificates
                .iter()
                .find(|c| c.name == PORTAL_CA_NAME)
                .map(|c| TrustSource::Configured {
                    pem_b64: c.pem_data.clone(),
                }),
        };

        Ok(Self {
            host,
            provisioning_enabled: flag(data, "OPENUNISON_PROVISIONING_ENABLED"),
            internal_groups: group("NAAS_GROUPS_INTERNAL"),
            external_groups: group("NAAS_GROUPS_EXTERNAL"),
            default_groups,
            trust,
        })
    }

    /// Base64 PEM of the certificate satellites must trust, if any
    pub async fn trusted_certificate<C: ClusterApi + ?Sized>(
        &self,
        cluster: &C,
        namespace: &str,
    ) -> Result<Option<String>> {
        match &self.trust {
            None => Ok(None),
            Some(TrustSource::Configured { pem_b64 }) => Ok(Some(pem_b64.clone())),
            Some(TrustSource::GeneratedCa { cert_key }) => {
                portal_certificate(cluster, namespace, cert_key).await.map(Some)
            }
        }
    }
}

/// Base64 PEM of the certificate the operator generated into
/// `ou-tls-certificate`
pub async fn portal_certificate<C: ClusterApi + ?Sized>(
    cluster: &C,
    namespace: &str,
    cert_key: &str,
) -> Result<String> {
    let data = cluster
        .get_secret(namespace, TLS_CERTIFICATE_SECRET)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!(
                "secret {}/{} on context {}",
                namespace,
                TLS_CERTIFICATE_SECRET,
                cluster.context()
            ))
        })?;
    let pem = data.get(cert_key).ok_or_else(|| {
        Error::not_found(format!(
            "key {} in secret {}/{}",
            cert_key, namespace, TLS_CERTIFICATE_SECRET
        ))
    })?;
    Ok(STANDARD.encode(pem))
}

fn lookup<'a>(data: &'a [NameValue], name: &str) -> Option<&'a str> {
    data.iter()
        .find(|nv| nv.name == name)
        .map(|nv| nv.value.as_str())
}

fn flag(data: &[NameValue], name: &str) -> bool {
    lookup(data, name).map_or(false, |v| v.eq_ignore_ascii_case("true"))
}

/// Base64 of a JSON array, absent or empty meaning no entries
fn decode_list(name: &str, encoded: Option<&str>) -> Result<Vec<Value>> {
    let encoded = match encoded.map(str::trim) {
        Some(e) if !e.is_empty() => e,
        _ => return Ok(Vec::new()),
    };
    let raw = STANDARD
        .decode(encoded)
        .map_err(|e| Error::configuration(format!("{} is not valid base64: {}", name, e)))?;
    serde_json::from_slice(&raw)
        .map_err(|e| Error::configuration(format!("{} is not a JSON array: {}", name, e)))
}

/// Load the control-plane portal's `OpenUnison` resource
pub async fn fetch_control_plane_portal<C: ClusterApi + ?Sized>(
    cluster: &C,
    namespace: &str,
    name: &str,
) -> Result<ControlPlanePortal> {
    let resource = openunison_resource();
    let version = cluster
        .served_stored_version(&resource.crd_name())
        .await?
        .ok_or_else(|| {
            Error::not_found(format!(
                "served and stored version of {} on context {}",
                resource,
                cluster.context()
            ))
        })?;
    debug!(crd = %resource, version = %version, "Resolved OpenUnison version");

    let object = cluster
        .get_custom_resource(&resource, &version, namespace, name)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!(
                "{} {}/{} on context {}",
                OPENUNISON_KIND,
                namespace,
                name,
                cluster.context()
            ))
        })?;

    ControlPlanePortal::from_resource(&object)
}
