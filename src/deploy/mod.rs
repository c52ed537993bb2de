//! Portal deployment orchestrator
//!
//! [`deploy_portal`] brings one cluster from any state (empty, partially
//! installed, fully installed) to a running portal:
//!
//! 1. Create the dashboard and portal namespaces
//! 2. Label the portal namespace
//! 3. Provision the credential secret
//! 4. Deploy the pre charts
//! 5. Deploy the operator and wait for it
//! 6. Remove a leftover configuration pre-check pod
//! 7. Deploy orchestra; a rejected pre-check ends the run with its logs
//! 8. Wait for orchestra
//! 9. Deploy the login portal and wait for it
//! 10. Deploy the post charts
//!
//! Each release is installed when absent and upgraded when present, so the
//! same invocation serves first installs and upgrades. Steps run one after
//! another; a failure is tagged with its [`DeployStage`] and ends the run.

pub mod installer;
pub mod readiness;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cluster::ClusterApi;
use crate::credentials::{ensure_secret, SecretInputs};
use crate::error::StageExt;
use crate::helm::{ChartRef, NamedChart, PackageEngine};
use crate::retry::RetryPolicy;
use crate::values::{merge, ValuesDocument, ValuesTree};
use crate::{
    DeployStage, Result, DEFAULT_LOGIN_PORTAL_CHART, DEFAULT_NAMESPACE, DEFAULT_OPERATOR_CHART,
    DEFAULT_ORCHESTRA_CHART, LOGIN_PORTAL_RELEASE, OPERATOR_RELEASE, ORCHESTRA_RELEASE,
};

pub use installer::{install, install_or_upgrade, upgrade, ReleaseAction, ReleaseRequest};
pub use readiness::wait_ready;

/// Deployment created by the operator chart
pub const OPERATOR_WORKLOAD: &str = "openunison-operator";
/// Deployment of the core portal, created by the operator
pub const ORCHESTRA_WORKLOAD: &str = "openunison-orchestra";
/// Deployment of the login portal
pub const LOGIN_PORTAL_WORKLOAD: &str = "ouhtml-orchestra-login-portal";
/// Selector of the pod that validates the portal configuration before rollout
pub const PRECHECK_SELECTOR: &str = "job-name=check-ou-config";
/// Pause between orchestra's release and its readiness check, letting the
/// operator start the rollout
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Charts of the three portal releases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalCharts {
    pub operator: ChartRef,
    pub orchestra: ChartRef,
    pub login_portal: ChartRef,
}

impl Default for PortalCharts {
    fn default() -> Self {
        Self {
            operator: ChartRef::new(DEFAULT_OPERATOR_CHART),
            orchestra: ChartRef::new(DEFAULT_ORCHESTRA_CHART),
            login_portal: ChartRef::new(DEFAULT_LOGIN_PORTAL_CHART),
        }
    }
}

/// Everything needed to deploy the portal into one cluster
pub struct DeploymentTarget {
    pub cluster: Arc<dyn ClusterApi>,
    pub engine: Arc<dyn PackageEngine>,
    pub namespace: String,
    /// Labels applied to the portal namespace (mesh injection and the like)
    pub namespace_labels: BTreeMap<String, String>,
    pub charts: PortalCharts,
    /// Charts deployed before the operator
    pub pre_charts: Vec<NamedChart>,
    /// Charts deployed once the portal is running
    pub post_charts: Vec<NamedChart>,
    pub secrets: SecretInputs,
    pub install_policy: RetryPolicy,
    pub readiness_policy: RetryPolicy,
    pub settle_delay: Duration,
}

impl DeploymentTarget {
    /// Target with default charts, policies and namespace
    pub fn new(cluster: Arc<dyn ClusterApi>, engine: Arc<dyn PackageEngine>) -> Self {
        Self {
            cluster,
            engine,
            namespace: DEFAULT_NAMESPACE.to_string(),
            namespace_labels: BTreeMap::new(),
            charts: PortalCharts::default(),
            pre_charts: Vec::new(),
            post_charts: Vec::new(),
            secrets: SecretInputs::default(),
            install_policy: RetryPolicy::installer(),
            readiness_policy: RetryPolicy::readiness(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Kube context the target is bound to
    pub fn context(&self) -> &str {
        self.cluster.context()
    }

    async fn apply(&self, release: &str, chart: &ChartRef, values: &ValuesTree) -> Result<ReleaseAction> {
        let action = install_or_upgrade(
            self.engine.as_ref(),
            &self.install_policy,
            ReleaseRequest {
                release,
                namespace: &self.namespace,
                chart,
                values,
            },
        )
        .await?;
        println!("  {} {:?}: {}", release, action, chart);
        Ok(action)
    }

    async fn wait(&self, workload: &str, desired: i32) -> Result<()> {
        println!("  Waiting for {} ({} replicas)...", workload, desired);
        wait_ready(
            self.cluster.as_ref(),
            &self.readiness_policy,
            &self.namespace,
            workload,
            desired,
        )
        .await
    }
}

/// How a deployment run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// All releases are deployed and ready
    Deployed {
        /// External host of the portal, when configured
        portal_host: Option<String>,
    },
    /// Orchestra was refused by the configuration pre-check; nothing past
    /// the operator was changed
    PrecheckRejected {
        /// Logs of the pre-check pod
        diagnostics: String,
    },
}

/// Deploy or upgrade the portal described by `values` into `target`
pub async fn deploy_portal(target: &DeploymentTarget, values: &ValuesDocument) -> Result<DeployOutcome> {
    let tree = values.tree();
    let portal = values.values();
    let cluster = target.cluster.as_ref();
    let namespace = target.namespace.as_str();

    info!(context = target.context(), namespace, "Deploying portal");

    println!("[Step 1] Creating namespaces...");
    if portal.dashboard.enabled {
        cluster
            .ensure_namespace(&portal.dashboard.namespace)
            .await
            .stage(DeployStage::Namespaces)?;
    }
    cluster
        .ensure_namespace(namespace)
        .await
        .stage(DeployStage::Namespaces)?;

    if !target.namespace_labels.is_empty() {
        println!("[Step 2] Labelling namespace {}...", namespace);
        cluster
            .label_namespace(namespace, &target.namespace_labels)
            .await
            .stage(DeployStage::NamespaceLabels)?;
    }

    println!("[Step 3] Provisioning credentials...");
    let applied = ensure_secret(cluster, namespace, portal, &target.secrets)
        .await
        .stage(DeployStage::Credentials)?;
    println!("  Secret {:?}, {} keys changed", applied.action, applied.changed_keys.len());

    if !target.pre_charts.is_empty() {
        println!("[Step 4] Deploying pre charts...");
        for named in &target.pre_charts {
            let defaults = target
                .engine
                .chart_defaults(&named.chart)
                .await
                .stage(DeployStage::PreCharts)?;
            target
                .apply(&named.release, &named.chart, &merge(&defaults, tree))
                .await
                .stage(DeployStage::PreCharts)?;
        }
    }

    println!("[Step 5] Deploying the operator...");
    target
        .apply(OPERATOR_RELEASE, &target.charts.operator, tree)
        .await
        .stage(DeployStage::Operator)?;
    target
        .wait(OPERATOR_WORKLOAD, 1)
        .await
        .stage(DeployStage::OperatorReady)?;

    println!("[Step 6] Deploying orchestra...");
    // a retried pre-check job leaves one pod per attempt
    let stale = cluster
        .list_pods(namespace, PRECHECK_SELECTOR)
        .await
        .stage(DeployStage::PrecheckCleanup)?;
    for pod in &stale {
        println!("  Removing previous pre-check pod {}", pod);
        cluster
            .delete_pod(namespace, pod)
            .await
            .stage(DeployStage::PrecheckCleanup)?;
    }

    let defaults = target
        .engine
        .chart_defaults(&target.charts.orchestra)
        .await
        .stage(DeployStage::CoreService)?;
    let orchestra_values = merge(&defaults, tree);
    if let Err(err) = target
        .apply(ORCHESTRA_RELEASE, &target.charts.orchestra, &orchestra_values)
        .await
    {
        return match precheck_diagnostics(cluster, namespace).await {
            Some(diagnostics) => {
                warn!(namespace, error = %err, "Configuration pre-check rejected orchestra");
                Ok(DeployOutcome::PrecheckRejected { diagnostics })
            }
            None => Err(err.at_stage(DeployStage::CoreService)),
        };
    }

    tokio::time::sleep(target.settle_delay).await;
    target
        .wait(ORCHESTRA_WORKLOAD, portal.orchestra_replicas())
        .await
        .stage(DeployStage::CoreServiceReady)?;

    println!("[Step 7] Deploying the login portal...");
    target
        .apply(LOGIN_PORTAL_RELEASE, &target.charts.login_portal, tree)
        .await
        .stage(DeployStage::LoginPortal)?;
    target
        .wait(LOGIN_PORTAL_WORKLOAD, portal.login_portal_replicas())
        .await
        .stage(DeployStage::LoginPortal)?;

    if !target.post_charts.is_empty() {
        println!("[Step 8] Deploying additional charts...");
        for named in &target.post_charts {
            target
                .apply(&named.release, &named.chart, tree)
                .await
                .stage(DeployStage::PostCharts)?;
        }
    }

    let portal_host = portal.network.openunison_host.clone();
    info!(namespace, portal_host = ?portal_host, "Portal deployed");
    Ok(DeployOutcome::Deployed { portal_host })
}

/// Logs of the newest pre-check pod, if one ran
async fn precheck_diagnostics(cluster: &dyn ClusterApi, namespace: &str) -> Option<String> {
    let pod = match cluster.list_pods(namespace, PRECHECK_SELECTOR).await {
        Ok(pods) => pods.into_iter().last()?,
        Err(e) => {
            warn!(namespace, error = %e, "Failed to look up pre-check pod");
            return None;
        }
    };
    match cluster.pod_logs(namespace, &pod).await {
        Ok(logs) => Some(logs),
        Err(e) => Some(format!("pre-check pod {} failed; logs unavailable: {}", pod, e)),
    }
}
