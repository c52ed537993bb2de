//! ouctl CLI
//!
//! Installs and upgrades the OpenUnison portal, and federates satellite
//! clusters with a control-plane portal.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ouctl::cluster::{parse_labels, ClusterApi, KubeCluster};
use ouctl::credentials::SecretInputs;
use ouctl::deploy::{deploy_portal, DeployOutcome, DeploymentTarget, PortalCharts};
use ouctl::helm::{parse_named_charts, ChartRef, HelmCli, PackageEngine};
use ouctl::satellite::{ControlPlane, SatelliteDeployment, SatelliteOptions};
use ouctl::values::ValuesDocument;
use ouctl::{
    DEFAULT_ADD_CLUSTER_CHART, DEFAULT_LOGIN_PORTAL_CHART, DEFAULT_NAMESPACE,
    DEFAULT_OPERATOR_CHART, DEFAULT_ORCHESTRA_CHART,
};

/// ouctl - OpenUnison portal installer
#[derive(Parser, Debug)]
#[command(name = "ouctl")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug)]
struct GlobalArgs {
    /// Namespace to deploy the portal into
    #[arg(short = 'n', long, global = true, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Operator chart, '@version' pins a version
    #[arg(short = 'o', long, global = true, default_value = DEFAULT_OPERATOR_CHART)]
    operator_chart: String,

    /// Orchestra chart, '@version' pins a version
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_ORCHESTRA_CHART)]
    orchestra_chart: String,

    /// Login portal chart, '@version' pins a version
    #[arg(short = 'l', long, global = true, default_value = DEFAULT_LOGIN_PORTAL_CHART)]
    orchestra_login_portal_chart: String,

    /// File holding the authentication method's secret
    #[arg(short = 's', long, global = true, env = "OUCTL_SECRETS_FILE")]
    secrets_file_path: Option<PathBuf>,

    /// File holding the provisioning database password
    #[arg(short = 'b', long, global = true)]
    database_secret_path: Option<PathBuf>,

    /// File holding the SMTP password
    #[arg(short = 't', long, global = true)]
    smtp_secret_path: Option<PathBuf>,

    /// release=chart[@version] entries deployed before the portal
    #[arg(short = 'u', long, global = true, value_delimiter = ',')]
    prerun_helm_charts: Vec<String>,

    /// release=chart[@version] entries deployed after the portal
    #[arg(short = 'r', long, global = true, value_delimiter = ',')]
    additional_helm_charts: Vec<String>,

    /// name=value labels added to the portal namespace
    #[arg(short = 'j', long, global = true, value_delimiter = ',')]
    namespace_labels: Vec<String>,

    /// Kubeconfig context to deploy into (defaults to the current context)
    #[arg(long, global = true, env = "OUCTL_KUBE_CONTEXT")]
    kube_context: Option<String>,

    /// helm executable used for every release operation
    #[arg(long, global = true, env = "OUCTL_HELM_BINARY", default_value = "helm")]
    helm_binary: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install or upgrade the portal from a values file
    InstallAuthPortal {
        /// Path to the portal's values.yaml
        values: PathBuf,
    },

    /// Deploy a satellite portal that authenticates against a control-plane portal
    InstallSatelite(SatelliteArgs),
}

#[derive(Args, Debug)]
struct SatelliteArgs {
    /// Path to the satellite's values.yaml; rewritten with the federation settings
    values: PathBuf,

    /// Kubeconfig context of the control plane
    control_plane_context: String,

    /// Kubeconfig context of the satellite
    satelite_context: String,

    /// Chart registering the satellite with the control plane
    #[arg(short = 'a', long, default_value = DEFAULT_ADD_CLUSTER_CHART)]
    add_cluster_chart: String,

    /// Also save the control plane's registration values to this path
    #[arg(long)]
    save_satelite_values_path: Option<PathBuf>,

    /// Name of the control plane's OpenUnison resource
    #[arg(short = 'q', long, default_value = "orchestra")]
    control_plane_orchestra_chart_name: String,

    /// Control-plane secret holding satellite client secrets
    #[arg(short = 'w', long, default_value = "orchestra-secrets-source")]
    control_plane_secret_name: String,

    /// Skip registering the satellite with the control plane (upgrades)
    #[arg(short = 'k', long)]
    skip_controlplane_integration: bool,
}

/// Connect both handles of one cluster
async fn connect(
    context: Option<&str>,
    helm_binary: &str,
) -> anyhow::Result<(Arc<dyn ClusterApi>, Arc<dyn PackageEngine>)> {
    let cluster = KubeCluster::connect(context)
        .await
        .with_context(|| format!("failed to connect to context {}", context.unwrap_or("(current)")))?;
    let engine = HelmCli::new(Some(cluster.context())).with_binary(helm_binary);
    Ok((Arc::new(cluster), Arc::new(engine)))
}

impl GlobalArgs {
    fn target(
        &self,
        cluster: Arc<dyn ClusterApi>,
        engine: Arc<dyn PackageEngine>,
    ) -> anyhow::Result<DeploymentTarget> {
        let mut target = DeploymentTarget::new(cluster, engine);
        target.namespace = self.namespace.clone();
        target.namespace_labels = parse_labels(&self.namespace_labels)?;
        target.charts = PortalCharts {
            operator: self.operator_chart.parse()?,
            orchestra: self.orchestra_chart.parse()?,
            login_portal: self.orchestra_login_portal_chart.parse()?,
        };
        target.pre_charts = parse_named_charts(&self.prerun_helm_charts)?;
        target.post_charts = parse_named_charts(&self.additional_helm_charts)?;
        target.secrets = SecretInputs {
            secret_file: self.secrets_file_path.clone(),
            db_password_file: self.database_secret_path.clone(),
            smtp_password_file: self.smtp_secret_path.clone(),
            client_secret: None,
        };
        Ok(target)
    }
}

fn report(outcome: &DeployOutcome) {
    match outcome {
        DeployOutcome::Deployed { portal_host } => {
            println!("\n=== Deployment complete ===");
            if let Some(host) = portal_host {
                println!("Portal: https://{}", host);
            }
        }
        DeployOutcome::PrecheckRejected { diagnostics } => {
            println!("\n=== Configuration check failed ===");
            println!("{}", diagnostics);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let global = cli.global;
    match cli.command {
        Commands::InstallAuthPortal { values } => {
            let values = ValuesDocument::load(&values).await?;
            let (cluster, engine) =
                connect(global.kube_context.as_deref(), &global.helm_binary).await?;
            let target = global.target(cluster, engine)?;
            println!("Deploying into context {}, namespace {}\n", target.context(), target.namespace);

            let outcome = deploy_portal(&target, &values).await?;
            report(&outcome);
        }
        Commands::InstallSatelite(args) => {
            let values = ValuesDocument::load(&args.values).await?;
            let (cp_cluster, cp_engine) =
                connect(Some(args.control_plane_context.as_str()), &global.helm_binary).await?;
            let (sat_cluster, sat_engine) =
                connect(Some(args.satelite_context.as_str()), &global.helm_binary).await?;
            let target = global.target(sat_cluster, sat_engine)?;

            let options = SatelliteOptions {
                control_plane_namespace: global.namespace.clone(),
                control_plane_resource: args.control_plane_orchestra_chart_name,
                control_plane_secret: args.control_plane_secret_name,
                add_cluster_chart: args.add_cluster_chart.parse::<ChartRef>()?,
                skip_control_plane_integration: args.skip_controlplane_integration,
                save_registration_path: args.save_satelite_values_path,
            };

            println!(
                "Federating {} with control plane {}\n",
                args.satelite_context, args.control_plane_context
            );
            let mut deployment = SatelliteDeployment::new(
                ControlPlane {
                    cluster: cp_cluster,
                    engine: cp_engine,
                },
                target,
                values,
                options,
            );
            let outcome = deployment.run().await?;
            report(&outcome.deployment);
            if let Some(action) = outcome.registration {
                println!("Control-plane registration: {:?}", action);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
