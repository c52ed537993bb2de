//! OIDC trust between a satellite and the control-plane portal

use serde::Serialize;

use crate::values::{to_tree, TrustedCert, ValuesTree};
use crate::Result;

/// Name of the trusted certificate entry holding the control plane's CA
pub const TRUSTED_IDP_CERT: &str = "trusted-idp";
/// Scopes requested by satellites
pub const SATELLITE_SCOPES: &str = "openid email profile groups";

/// Client id a satellite uses against the control plane, also the key of its
/// shared secret in the control-plane secret
pub fn client_id(cluster_name: &str) -> String {
    format!("cluster-idp-{}", cluster_name)
}

/// Issuer URL of the control-plane identity provider for a satellite
pub fn issuer(host: &str, client_id: &str) -> String {
    format!("https://{}/auth/idp/{}", host, client_id)
}

#[derive(Debug, Serialize)]
struct Claims {
    sub: &'static str,
    email: &'static str,
    given_name: &'static str,
    family_name: &'static str,
    display_name: &'static str,
    groups: &'static str,
}

#[derive(Debug, Serialize)]
struct OidcBlock {
    client_id: String,
    issuer: String,
    user_in_idp: bool,
    domain: String,
    scopes: &'static str,
    claims: Claims,
}

/// `oidc` section pointing a satellite at the control-plane portal
pub fn satellite_oidc(control_plane_host: &str, cluster_name: &str) -> Result<ValuesTree> {
    let client_id = client_id(cluster_name);
    to_tree(&OidcBlock {
        issuer: issuer(control_plane_host, &client_id),
        client_id,
        user_in_idp: false,
        domain: String::new(),
        scopes: SATELLITE_SCOPES,
        claims: Claims {
            sub: "sub",
            email: "email",
            given_name: "given_name",
            family_name: "family_name",
            display_name: "name",
            groups: "groups",
        },
    })
}

/// Change made to the trusted certificates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustUpdate {
    /// An entry with this name already holds the certificate
    Present(String),
    /// The `trusted-idp` entry now holds the certificate
    Replaced,
    /// A new `trusted-idp` entry was added
    Appended,
}

/// Make `certs` trust `pem_b64` without ever holding the same certificate twice.
///
/// An entry that already holds the certificate, under any name, is kept as
/// is. Otherwise the `trusted-idp` entry is rewritten, or added if missing.
pub fn upsert_trusted_cert(certs: &mut Vec<TrustedCert>, pem_b64: &str) -> TrustUpdate {
    if let Some(existing) = certs.iter().find(|c| c.pem_b64 == pem_b64) {
        return TrustUpdate::Present(existing.name.clone());
    }
    match certs.iter_mut().find(|c| c.name == TRUSTED_IDP_CERT) {
        Some(entry) => {
            entry.pem_b64 = pem_b64.to_string();
            TrustUpdate::Replaced
        }
        None => {
            certs.push(TrustedCert {
                name: TRUSTED_IDP_CERT.to_string(),
                pem_b64: pem_b64.to_string(),
            });
            TrustUpdate::Appended
        }
    }
}
