//! Helm release operations
//!
//! Chart rendering and manifest diffing belong to helm; ouctl only decides
//! which release operation to run and with what values. [`PackageEngine`] is
//! that boundary, and [`HelmCli`] drives the `helm` binary against one kube
//! context.

mod chart;

use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::values::ValuesTree;
use crate::{Error, Result};

pub use chart::{parse_named_charts, ChartRef, NamedChart};

/// Release operations against one cluster context
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PackageEngine: Send + Sync {
    /// Names of the releases deployed in a namespace
    async fn list_releases(&self, namespace: &str) -> Result<Vec<String>>;

    /// Default values shipped with a chart
    async fn chart_defaults(&self, chart: &ChartRef) -> Result<ValuesTree>;

    /// Install a new release
    async fn install(
        &self,
        release: &str,
        namespace: &str,
        chart: &ChartRef,
        values: &ValuesTree,
    ) -> Result<()>;

    /// Upgrade an existing release
    async fn upgrade(
        &self,
        release: &str,
        namespace: &str,
        chart: &ChartRef,
        values: &ValuesTree,
    ) -> Result<()>;

    /// Remove a release
    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()>;
}

/// Whether `release` is currently deployed in `namespace`
pub async fn release_exists<E: PackageEngine + ?Sized>(
    engine: &E,
    namespace: &str,
    release: &str,
) -> Result<bool> {
    Ok(engine
        .list_releases(namespace)
        .await?
        .iter()
        .any(|r| r == release))
}

/// Entry of `helm list -o json`
#[derive(Debug, Deserialize)]
struct ListedRelease {
    name: String,
}

/// [`PackageEngine`] backed by the helm CLI
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: String,
    kube_context: Option<String>,
}

impl HelmCli {
    /// Drive `helm` from `PATH` against the given context (or helm's default)
    pub fn new(kube_context: Option<&str>) -> Self {
        Self {
            binary: "helm".to_string(),
            kube_context: kube_context.map(str::to_string),
        }
    }

    /// Use a specific helm binary
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn base_args(&self) -> Vec<String> {
        match &self.kube_context {
            Some(ctx) => vec!["--kube-context".to_string(), ctx.clone()],
            None => Vec::new(),
        }
    }

    /// Run helm, optionally feeding `stdin`, and return stdout
    async fn run(&self, args: &[String], stdin: Option<String>) -> Result<String> {
        let mut full_args = self.base_args();
        full_args.extend_from_slice(args);
        debug!(command = %format!("{} {}", self.binary, full_args.join(" ")), "Running helm");

        let mut child = Command::new(&self.binary)
            .args(&full_args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::engine(format!("failed to run {}: {}", self.binary, e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::engine(format!(
                "helm {} failed: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn deploy(
        &self,
        verb: &str,
        release: &str,
        namespace: &str,
        chart: &ChartRef,
        values: &ValuesTree,
    ) -> Result<()> {
        let args = deploy_args(verb, release, namespace, chart);
        let values_yaml = serde_yaml::to_string(values)?;
        self.run(&args, Some(values_yaml)).await?;
        Ok(())
    }
}

/// Arguments for `helm install|upgrade`, values read from stdin
fn deploy_args(verb: &str, release: &str, namespace: &str, chart: &ChartRef) -> Vec<String> {
    let mut args = vec![
        verb.to_string(),
        release.to_string(),
        chart.reference.clone(),
        "--namespace".to_string(),
        namespace.to_string(),
        "-f".to_string(),
        "-".to_string(),
    ];
    if let Some(version) = &chart.version {
        args.push("--version".to_string());
        args.push(version.clone());
    }
    args
}

#[async_trait]
impl PackageEngine for HelmCli {
    async fn list_releases(&self, namespace: &str) -> Result<Vec<String>> {
        let args: Vec<String> = ["list", "--namespace", namespace, "-o", "json"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = self.run(&args, None).await?;
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let releases: Vec<ListedRelease> = serde_json::from_str(trimmed)?;
        Ok(releases.into_iter().map(|r| r.name).collect())
    }

    async fn chart_defaults(&self, chart: &ChartRef) -> Result<ValuesTree> {
        let mut args = vec![
            "show".to_string(),
            "values".to_string(),
            chart.reference.clone(),
        ];
        if let Some(version) = &chart.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        let output = self.run(&args, None).await?;
        match serde_yaml::from_str::<serde_yaml::Value>(&output)? {
            serde_yaml::Value::Mapping(m) => Ok(m),
            serde_yaml::Value::Null => Ok(ValuesTree::new()),
            _ => Err(Error::engine(format!(
                "default values of {} are not a mapping",
                chart
            ))),
        }
    }

    async fn install(
        &self,
        release: &str,
        namespace: &str,
        chart: &ChartRef,
        values: &ValuesTree,
    ) -> Result<()> {
        self.deploy("install", release, namespace, chart, values)
            .await
    }

    async fn upgrade(
        &self,
        release: &str,
        namespace: &str,
        chart: &ChartRef,
        values: &ValuesTree,
    ) -> Result<()> {
        self.deploy("upgrade", release, namespace, chart, values)
            .await
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        let args: Vec<String> = ["uninstall", release, "--namespace", namespace]
            .iter()
            .map(|s| s.to_string())
            .collect();
        self.run(&args, None).await?;
        Ok(())
    }
}
