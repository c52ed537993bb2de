//! Values for the add-cluster chart, which registers a satellite with the
//! control-plane portal

use serde::Serialize;
use serde_yaml::Value;

use super::portal::ControlPlanePortal;
use crate::values::{merge, section, to_tree, PortalValues, ValuesTree};
use crate::{Error, Result};

/// Organization satellites are filed under when none is configured
pub const DEFAULT_PARENT_ORG: &str = "B158BD40-0C1B-11E3-8FFD-0800200C9A66";
/// SSO session timeout when the satellite does not set one
pub const DEFAULT_INACTIVITY_TIMEOUT_SECONDS: u64 = 900;

#[derive(Debug, Serialize)]
struct Registration {
    cluster: ClusterEntry,
    naas: NaasEntry,
}

#[derive(Debug, Serialize)]
struct ClusterEntry {
    name: String,
    label: String,
    description: String,
    parent: String,
    sso: SsoEntry,
    hosts: Hosts,
    az_groups: Vec<Value>,
    additional_badges: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SsoEntry {
    enabled: bool,
    inactivity_timeout_seconds: u64,
    #[serde(rename = "client_secret")]
    client_secret: String,
}

#[derive(Debug, Serialize)]
struct Hosts {
    portal: Option<String>,
    dashboard: Option<String>,
}

#[derive(Debug, Serialize)]
struct NaasEntry {
    enabled: bool,
    groups: NaasGroupsEntry,
}

#[derive(Debug, Serialize)]
struct NaasGroupsEntry {
    internal: GroupEntry,
    external: GroupEntry,
    default: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct GroupEntry {
    enabled: bool,
    suffix: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManagementTarget {
    url: String,
    token_type: &'static str,
    use_token: bool,
    #[serde(rename = "base64_certificate", skip_serializing_if = "Option::is_none")]
    base64_certificate: Option<String>,
}

#[derive(Debug, Serialize)]
struct Management {
    enabled: bool,
    target: ManagementTarget,
}

/// Registration values for `cluster_name`
pub fn registration_values(
    cluster_name: &str,
    satellite: &PortalValues,
    control_plane: &ControlPlanePortal,
    client_secret: &str,
) -> Result<ValuesTree> {
    let cp = &satellite.openunison.control_plane;
    to_tree(&Registration {
        cluster: ClusterEntry {
            name: cluster_name.to_string(),
            label: cp.label.clone().unwrap_or_else(|| cluster_name.to_string()),
            description: cp
                .description
                .clone()
                .unwrap_or_else(|| format!("Cluster {}", cluster_name)),
            parent: cp
                .parent_org
                .clone()
                .unwrap_or_else(|| DEFAULT_PARENT_ORG.to_string()),
            sso: SsoEntry {
                enabled: true,
                inactivity_timeout_seconds: satellite
                    .network
                    .session_inactivity_timeout_seconds
                    .unwrap_or(DEFAULT_INACTIVITY_TIMEOUT_SECONDS),
                client_secret: client_secret.to_string(),
            },
            hosts: Hosts {
                portal: satellite.network.openunison_host.clone(),
                dashboard: satellite.network.dashboard_host.clone(),
            },
            az_groups: satellite.openunison.az_groups.clone(),
            additional_badges: cp.additional_badges.clone(),
        },
        naas: NaasEntry {
            enabled: control_plane.provisioning_enabled,
            groups: NaasGroupsEntry {
                internal: GroupEntry {
                    enabled: control_plane.internal_groups.enabled,
                    suffix: control_plane.internal_groups.suffix.clone(),
                },
                external: GroupEntry {
                    enabled: control_plane.external_groups.enabled,
                    suffix: control_plane.external_groups.suffix.clone(),
                },
                default: control_plane.default_groups.clone(),
            },
        },
    })
}

/// Whether the control plane should also manage the satellite through its
/// API proxy
pub fn wants_management(satellite: &PortalValues, control_plane: &ControlPlanePortal) -> bool {
    control_plane.provisioning_enabled && satellite.openunison.management_proxy.enabled
}

/// Add the management block to a registration
pub fn with_management(
    registration: &ValuesTree,
    satellite: &PortalValues,
    certificate: Option<String>,
) -> Result<ValuesTree> {
    let host = satellite
        .openunison
        .management_proxy
        .host
        .clone()
        .or_else(|| satellite.network.api_server_host.clone())
        .ok_or_else(|| {
            Error::configuration(
                "openunison.management_proxy is enabled but neither its host nor network.api_server_host is set",
            )
        })?;

    let management = to_tree(&Management {
        enabled: true,
        target: ManagementTarget {
            url: format!("https://{}", host),
            token_type: "oidc",
            use_token: true,
            base64_certificate: certificate,
        },
    })?;
    let overlay = section("cluster", section("management", management));
    Ok(merge(registration, &overlay))
}
