//! Satellite federation
//!
//! A satellite is a cluster whose portal authenticates users against a
//! control-plane portal over OIDC. Federating one means:
//!
//! 1. Reuse or create the satellite's shared secret on the control plane
//! 2. Read the control-plane portal's host, NaaS settings and CA
//! 3. Point the satellite's values at the control plane (OIDC and trust)
//!    and save them
//! 4. Register the satellite with the control plane (add-cluster release)
//! 5. Deploy the satellite portal
//! 6. Optionally register the satellite for management through its API proxy
//!
//! Every step is idempotent, so re-running upgrades a federated satellite
//! rather than duplicating anything. The control plane and the satellite are
//! reached through separate handles, each bound to its own kube context.

mod oidc;
mod portal;
mod registration;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cluster::{ClusterApi, SecretData};
use crate::credentials::generate_secret;
use crate::deploy::{
    deploy_portal, install_or_upgrade, DeployOutcome, DeploymentTarget, ReleaseAction,
    ReleaseRequest,
};
use crate::helm::{ChartRef, PackageEngine};
use crate::values::{section, ValuesDocument, ValuesTree};
use crate::{Error, Result, CREDENTIALS_SECRET_NAME, DEFAULT_ADD_CLUSTER_CHART, DEFAULT_NAMESPACE};

pub use oidc::{
    client_id, issuer, satellite_oidc, upsert_trusted_cert, TrustUpdate, TRUSTED_IDP_CERT,
};
pub use portal::{
    fetch_control_plane_portal, openunison_resource, portal_certificate, ControlPlanePortal,
    GroupSetting, TrustSource, DEFAULT_CERT_KEY, DEFAULT_PORTAL_RESOURCE, PORTAL_CA_NAME,
    TLS_CERTIFICATE_SECRET,
};
pub use registration::{
    registration_values, wants_management, with_management, DEFAULT_PARENT_ORG,
};

/// Knobs of a federation run
#[derive(Debug, Clone)]
pub struct SatelliteOptions {
    /// Namespace of the portal on the control plane
    pub control_plane_namespace: String,
    /// Name of the control plane's `OpenUnison` resource
    pub control_plane_resource: String,
    /// Control-plane secret holding the satellites' shared secrets
    pub control_plane_secret: String,
    pub add_cluster_chart: ChartRef,
    /// Leave the control plane's registration alone (upgrading a satellite)
    pub skip_control_plane_integration: bool,
    /// Also write the registration values to this file
    pub save_registration_path: Option<PathBuf>,
}

impl Default for SatelliteOptions {
    fn default() -> Self {
        Self {
            control_plane_namespace: DEFAULT_NAMESPACE.to_string(),
            control_plane_resource: DEFAULT_PORTAL_RESOURCE.to_string(),
            control_plane_secret: CREDENTIALS_SECRET_NAME.to_string(),
            add_cluster_chart: ChartRef::new(DEFAULT_ADD_CLUSTER_CHART),
            skip_control_plane_integration: false,
            save_registration_path: None,
        }
    }
}

/// Handles to the control-plane cluster
pub struct ControlPlane {
    pub cluster: Arc<dyn ClusterApi>,
    pub engine: Arc<dyn PackageEngine>,
}

/// How a federation run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SatelliteOutcome {
    /// Result of deploying the satellite portal
    pub deployment: DeployOutcome,
    /// What happened to the registration release, `None` when skipped
    pub registration: Option<ReleaseAction>,
    /// Whether the management pass ran
    pub managed: bool,
}

/// One federation of a satellite with a control plane
pub struct SatelliteDeployment {
    control_plane: ControlPlane,
    satellite: DeploymentTarget,
    values: ValuesDocument,
    options: SatelliteOptions,
}

impl SatelliteDeployment {
    pub fn new(
        control_plane: ControlPlane,
        satellite: DeploymentTarget,
        values: ValuesDocument,
        options: SatelliteOptions,
    ) -> Self {
        Self {
            control_plane,
            satellite,
            values,
            options,
        }
    }

    /// The satellite's values document, as rewritten by the run
    pub fn values(&self) -> &ValuesDocument {
        &self.values
    }

    /// Name of the registration release on the control plane
    pub fn registration_release(cluster_name: &str) -> String {
        format!("satellite-{}", cluster_name)
    }

    /// Federate the satellite and deploy its portal
    pub async fn run(&mut self) -> Result<SatelliteOutcome> {
        let cluster_name = self
            .values
            .values()
            .k8s_cluster_name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::configuration("k8s_cluster_name is required for a satellite"))?;

        info!(
            cluster = %cluster_name,
            control_plane = self.control_plane.cluster.context(),
            satellite = self.satellite.context(),
            "Federating satellite"
        );

        println!("[Federation] Provisioning shared secret on the control plane...");
        let shared_secret = self.shared_secret(&cluster_name).await?;

        println!("[Federation] Reading the control-plane portal...");
        let cp_namespace = self.options.control_plane_namespace.clone();
        let portal = fetch_control_plane_portal(
            self.control_plane.cluster.as_ref(),
            &cp_namespace,
            &self.options.control_plane_resource,
        )
        .await?;
        let idp_cert = portal
            .trusted_certificate(self.control_plane.cluster.as_ref(), &cp_namespace)
            .await?;

        println!("[Federation] Updating {}...", self.values.path().display());
        self.values
            .apply_overlay(&section("oidc", satellite_oidc(&portal.host, &cluster_name)?))?;
        // the shared secret is the satellite's client secret; an inline one
        // left from an earlier setup would diverge from the registration
        if self.values.remove_from("oidc", "client_secret")? {
            warn!(
                cluster = %cluster_name,
                "Dropped inline oidc.client_secret in favour of the shared secret"
            );
        }
        if self.satellite.secrets.secret_file.is_some() {
            warn!(
                cluster = %cluster_name,
                "Ignoring --secrets-file-path, the shared secret is used instead"
            );
        }
        if let Some(pem) = idp_cert {
            let mut certs = self.values.values().trusted_certs.clone();
            let update = upsert_trusted_cert(&mut certs, &pem);
            info!(update = ?update, "Control-plane CA trusted");
            if !matches!(update, TrustUpdate::Present(_)) {
                self.values
                    .set("trusted_certs", serde_yaml::to_value(&certs)?)?;
            }
        }
        self.values.save().await?;

        let mut registration = None;
        let mut registration_values_tree = None;
        if !self.options.skip_control_plane_integration {
            println!("[Federation] Registering {} with the control plane...", cluster_name);
            let reg = registration_values(
                &cluster_name,
                self.values.values(),
                &portal,
                &shared_secret,
            )?;
            registration = Some(self.register(&cluster_name, &reg).await?);
            if let Some(path) = &self.options.save_registration_path {
                tokio::fs::write(path, serde_yaml::to_string(&reg)?).await?;
                println!("  Registration values saved to {}", path.display());
            }
            registration_values_tree = Some(reg);
        }

        println!("[Federation] Deploying the satellite portal...");
        self.satellite.secrets.client_secret = Some(shared_secret);
        let deployment = deploy_portal(&self.satellite, &self.values).await?;
        if let DeployOutcome::PrecheckRejected { .. } = deployment {
            warn!(cluster = %cluster_name, "Satellite pre-check rejected the configuration");
            return Ok(SatelliteOutcome {
                deployment,
                registration,
                managed: false,
            });
        }

        let mut managed = false;
        if let Some(reg) = registration_values_tree {
            if wants_management(self.values.values(), &portal) {
                println!("[Federation] Registering {} for management...", cluster_name);
                let certificate = self.satellite_certificate().await?;
                let reg = with_management(&reg, self.values.values(), certificate)?;
                self.register(&cluster_name, &reg).await?;
                managed = true;
            }
        }

        info!(cluster = %cluster_name, managed, "Satellite federated");
        Ok(SatelliteOutcome {
            deployment,
            registration,
            managed,
        })
    }

    /// Existing shared secret for the satellite, or a new one stored on the
    /// control plane. Only a missing secret or key leads to generation.
    async fn shared_secret(&self, cluster_name: &str) -> Result<String> {
        let cluster = self.control_plane.cluster.as_ref();
        let namespace = &self.options.control_plane_namespace;
        let name = &self.options.control_plane_secret;
        let key = client_id(cluster_name);

        let existing = cluster.get_secret(namespace, name).await?;
        if let Some(value) = existing.as_ref().and_then(|data| data.get(&key)) {
            info!(secret = %name, key = %key, "Reusing shared secret");
            return String::from_utf8(value.clone()).map_err(|_| {
                Error::configuration(format!("{} in secret {}/{} is not UTF-8", key, namespace, name))
            });
        }

        let secret = generate_secret();
        match existing {
            Some(mut data) => {
                data.insert(key.clone(), secret.clone().into_bytes());
                cluster.update_secret(namespace, name, &data).await?;
            }
            None => {
                cluster
                    .create_secret(
                        namespace,
                        name,
                        &SecretData::from([(key.clone(), secret.clone().into_bytes())]),
                    )
                    .await?;
            }
        }
        info!(secret = %name, key = %key, "Generated shared secret");
        Ok(secret)
    }

    async fn register(&self, cluster_name: &str, values: &ValuesTree) -> Result<ReleaseAction> {
        let release = Self::registration_release(cluster_name);
        let action = install_or_upgrade(
            self.control_plane.engine.as_ref(),
            &self.satellite.install_policy,
            ReleaseRequest {
                release: &release,
                namespace: &self.options.control_plane_namespace,
                chart: &self.options.add_cluster_chart,
                values,
            },
        )
        .await?;
        println!("  {} {:?}", release, action);
        Ok(action)
    }

    /// CA of the satellite portal: the configured `unison-ca` entry, else the
    /// certificate the satellite's operator generated
    async fn satellite_certificate(&self) -> Result<Option<String>> {
        if let Some(cert) = self.values.values().trusted_cert(PORTAL_CA_NAME) {
            return Ok(Some(cert.pem_b64.clone()));
        }
        match portal_certificate(
            self.satellite.cluster.as_ref(),
            &self.satellite.namespace,
            DEFAULT_CERT_KEY,
        )
        .await
        {
            Ok(cert) => Ok(Some(cert)),
            Err(Error::ResourceNotFound(what)) => {
                warn!(missing = %what, "Satellite certificate not found, registering without it");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::portal::fixtures::control_plane_resource;
    use super::*;
    use crate::deploy::{LOGIN_PORTAL_WORKLOAD, OPERATOR_WORKLOAD, ORCHESTRA_WORKLOAD};
    use crate::retry::RetryPolicy;
    use crate::testing::{FakeCluster, FakeEngine};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use std::time::Duration;

    const SATELLITE_VALUES: &str = r#"
k8s_cluster_name: east
network:
  openunison_host: k8sou.east.example.com
  dashboard_host: k8sdb.east.example.com
  api_server_host: k8sapi.east.example.com
openunison:
  management_proxy:
    enabled: true
trusted_certs:
  - name: corp-root
    pem_b64: Q09SUA==
"#;

    struct Clusters {
        cp: Arc<FakeCluster>,
        cp_engine: Arc<FakeEngine>,
        sat: Arc<FakeCluster>,
        sat_engine: Arc<FakeEngine>,
        dir: tempfile::TempDir,
    }

    impl Clusters {
        fn new() -> Self {
            let cp = Arc::new(FakeCluster::new("control-plane"));
            cp.set_crd_version("openunisons.openunison.tremolo.io", "v6");
            cp.put_custom_resource(
                "openunison",
                "orchestra",
                control_plane_resource("k8sou.cp.example.com"),
            );
            cp.put_secret("openunison", CREDENTIALS_SECRET_NAME, &[("K8S_DB_SECRET", "x")]);
            cp.put_secret(
                "openunison",
                TLS_CERTIFICATE_SECRET,
                &[("tls.crt", "control-plane-ca")],
            );

            let sat = Arc::new(FakeCluster::new("east"));
            sat.ready_workload("openunison", OPERATOR_WORKLOAD, 1);
            sat.ready_workload("openunison", ORCHESTRA_WORKLOAD, 1);
            sat.ready_workload("openunison", LOGIN_PORTAL_WORKLOAD, 1);
            sat.put_secret("openunison", TLS_CERTIFICATE_SECRET, &[("tls.crt", "east-ca")]);

            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("east.yaml"), SATELLITE_VALUES).unwrap();

            Self {
                cp,
                cp_engine: Arc::new(FakeEngine::new()),
                sat,
                sat_engine: Arc::new(FakeEngine::new()),
                dir,
            }
        }

        fn values_path(&self) -> PathBuf {
            self.dir.path().join("east.yaml")
        }

        async fn deployment(&self, options: SatelliteOptions) -> SatelliteDeployment {
            let mut target = DeploymentTarget::new(self.sat.clone(), self.sat_engine.clone());
            target.install_policy = RetryPolicy::immediate(6);
            target.readiness_policy = RetryPolicy::immediate(3);
            target.settle_delay = Duration::ZERO;
            SatelliteDeployment::new(
                ControlPlane {
                    cluster: self.cp.clone(),
                    engine: self.cp_engine.clone(),
                },
                target,
                ValuesDocument::load(self.values_path()).await.unwrap(),
                options,
            )
        }

        fn shared_secret(&self) -> String {
            let data = self.cp.secret("openunison", CREDENTIALS_SECRET_NAME).unwrap();
            String::from_utf8(data["cluster-idp-east"].clone()).unwrap()
        }
    }

    /// Story: first federation of satellite "east"
    ///
    /// The control plane gets a 64-character shared secret, the satellite's
    /// values point at the control plane's IdP and trust its CA, the
    /// satellite portal uses the shared secret, and the control plane
    /// registers and then manages the satellite.
    #[tokio::test]
    async fn story_first_federation() {
        let c = Clusters::new();
        let mut deployment = c.deployment(SatelliteOptions::default()).await;

        let outcome = deployment.run().await.unwrap();

        assert_eq!(
            outcome,
            SatelliteOutcome {
                deployment: DeployOutcome::Deployed {
                    portal_host: Some("k8sou.east.example.com".to_string())
                },
                registration: Some(ReleaseAction::Install),
                managed: true,
            }
        );

        let shared = c.shared_secret();
        assert_eq!(shared.len(), 64);
        let cp_secret = c.cp.secret("openunison", CREDENTIALS_SECRET_NAME).unwrap();
        assert_eq!(cp_secret["K8S_DB_SECRET"], b"x");

        let saved = ValuesDocument::load(c.values_path()).await.unwrap();
        let oidc = saved.values().oidc.clone().unwrap();
        assert_eq!(oidc.client_id.as_deref(), Some("cluster-idp-east"));
        assert_eq!(
            oidc.issuer.as_deref(),
            Some("https://k8sou.cp.example.com/auth/idp/cluster-idp-east")
        );
        assert_eq!(
            saved.values().trusted_cert(TRUSTED_IDP_CERT).map(|c| c.pem_b64.clone()),
            Some(STANDARD.encode("control-plane-ca"))
        );
        assert_eq!(saved.values().trusted_certs.len(), 2);

        let sat_secret = c.sat.secret("openunison", CREDENTIALS_SECRET_NAME).unwrap();
        assert_eq!(sat_secret["OIDC_CLIENT_SECRET"], shared.as_bytes());

        assert_eq!(c.cp_engine.verbs("satellite-east"), vec!["install", "upgrade"]);
        let reg = c.cp_engine.values_of("openunison", "satellite-east").unwrap();
        let target = &reg["cluster"]["management"]["target"];
        assert_eq!(target["url"], serde_yaml::Value::from("https://k8sapi.east.example.com"));
        assert_eq!(
            target["base64_certificate"],
            serde_yaml::Value::from(STANDARD.encode("east-ca"))
        );
        assert_eq!(
            reg["cluster"]["sso"]["client_secret"],
            serde_yaml::Value::from(shared.as_str())
        );
    }

    /// Story: the same satellite is federated again after a chart bump
    ///
    /// The shared secret is reused, the trust entry is not duplicated, and
    /// every release on both clusters is upgraded rather than reinstalled.
    #[tokio::test]
    async fn story_second_run_upgrades_in_place() {
        let c = Clusters::new();
        c.deployment(SatelliteOptions::default())
            .await
            .run()
            .await
            .unwrap();
        let first_secret = c.shared_secret();
        let first_values = std::fs::read_to_string(c.values_path()).unwrap();

        let outcome = c
            .deployment(SatelliteOptions::default())
            .await
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.registration, Some(ReleaseAction::Upgrade));
        assert_eq!(c.shared_secret(), first_secret);
        assert_eq!(std::fs::read_to_string(c.values_path()).unwrap(), first_values);
        assert_eq!(
            c.cp_engine.verbs("satellite-east"),
            vec!["install", "upgrade", "upgrade", "upgrade"]
        );
        for release in ["openunison-operator", "orchestra", "orchestra-login-portal"] {
            assert_eq!(c.sat_engine.verbs(release), vec!["install", "upgrade"]);
        }
    }

    /// Story: a cluster that used its own IdP is turned into a satellite
    ///
    /// Its values still hold an inline OIDC secret and the operator passes a
    /// secrets file out of habit. The satellite must still log in with the
    /// shared secret the control plane registered.
    #[tokio::test]
    async fn story_stale_inline_secret_does_not_break_sso() {
        let c = Clusters::new();
        let with_stale = format!(
            "{}oidc:\n  client_id: old\n  client_secret: stale\n",
            SATELLITE_VALUES
        );
        std::fs::write(c.values_path(), with_stale).unwrap();
        let secret_file = c.dir.path().join("oidc-secret");
        std::fs::write(&secret_file, "from-file").unwrap();

        let mut deployment = c.deployment(SatelliteOptions::default()).await;
        deployment.satellite.secrets.secret_file = Some(secret_file);
        deployment.run().await.unwrap();

        let shared = c.shared_secret();
        let sat_secret = c.sat.secret("openunison", CREDENTIALS_SECRET_NAME).unwrap();
        assert_eq!(sat_secret["OIDC_CLIENT_SECRET"], shared.as_bytes());
        let reg = c.cp_engine.values_of("openunison", "satellite-east").unwrap();
        assert_eq!(
            reg["cluster"]["sso"]["client_secret"],
            serde_yaml::Value::from(shared.as_str())
        );

        let saved = ValuesDocument::load(c.values_path()).await.unwrap();
        let oidc = saved.values().oidc.clone().unwrap();
        assert_eq!(oidc.client_id.as_deref(), Some("cluster-idp-east"));
        assert_eq!(oidc.client_secret, None);
    }

    #[tokio::test]
    async fn skipping_integration_leaves_control_plane_releases_alone() {
        let c = Clusters::new();
        let options = SatelliteOptions {
            skip_control_plane_integration: true,
            ..Default::default()
        };

        let outcome = c.deployment(options).await.run().await.unwrap();

        assert_eq!(outcome.registration, None);
        assert!(!outcome.managed);
        assert!(c.cp_engine.calls().is_empty());
        // the shared secret is still provisioned so the satellite can log in
        assert_eq!(c.shared_secret().len(), 64);
    }

    #[tokio::test]
    async fn registration_values_can_be_saved() {
        let c = Clusters::new();
        let saved = c.dir.path().join("registration.yaml");
        let options = SatelliteOptions {
            save_registration_path: Some(saved.clone()),
            ..Default::default()
        };

        c.deployment(options).await.run().await.unwrap();

        let reg: ValuesTree =
            serde_yaml::from_str(&std::fs::read_to_string(saved).unwrap()).unwrap();
        assert_eq!(reg["cluster"]["name"], serde_yaml::Value::from("east"));
        assert!(reg["cluster"].get("management").is_none());
    }

    #[tokio::test]
    async fn missing_cluster_name_is_rejected_before_any_change() {
        let c = Clusters::new();
        std::fs::write(c.values_path(), "network: {openunison_host: ou}\n").unwrap();

        let err = c
            .deployment(SatelliteOptions::default())
            .await
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)), "got {err:?}");
        assert_eq!(c.cp.secret_writes(), 0);
    }

    #[tokio::test]
    async fn missing_control_plane_portal_is_not_found() {
        let c = Clusters::new();
        let options = SatelliteOptions {
            control_plane_resource: "other".to_string(),
            ..Default::default()
        };

        let err = c.deployment(options).await.run().await.unwrap_err();

        assert!(matches!(err, Error::ResourceNotFound(_)), "got {err:?}");
        assert!(c.sat_engine.calls().is_empty());
    }

    #[tokio::test]
    async fn unreadable_control_plane_secret_is_never_regenerated() {
        let c = Clusters::new();
        let mut cp = crate::cluster::MockClusterApi::new();
        cp.expect_context().return_const("control-plane".to_string());
        cp.expect_get_secret()
            .returning(|_, _| Err(Error::cluster("forbidden")));
        cp.expect_create_secret().never();
        cp.expect_update_secret().never();

        let mut target = DeploymentTarget::new(c.sat.clone(), c.sat_engine.clone());
        target.settle_delay = Duration::ZERO;
        let mut deployment = SatelliteDeployment::new(
            ControlPlane {
                cluster: Arc::new(cp),
                engine: c.cp_engine.clone(),
            },
            target,
            ValuesDocument::load(c.values_path()).await.unwrap(),
            SatelliteOptions::default(),
        );

        let err = deployment.run().await.unwrap_err();
        assert!(matches!(err, Error::Cluster(_)), "got {err:?}");
    }
}
