//! In-memory cluster and helm fakes for multi-step tests
//!
//! The mockall mocks suit single-operation tests. Orchestrator and federation
//! tests drive dozens of calls across two clusters, so they run against these
//! fakes and assert on the resulting state instead.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::cluster::{ClusterApi, CustomResourceType, SecretData, WorkloadStatus};
use crate::helm::{ChartRef, PackageEngine};
use crate::values::ValuesTree;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct FakePod {
    pub name: String,
    pub logs: String,
}

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeSet<String>,
    labels: BTreeMap<String, BTreeMap<String, String>>,
    secrets: BTreeMap<(String, String), SecretData>,
    secret_writes: usize,
    workloads: BTreeMap<(String, String), WorkloadStatus>,
    /// Pods keyed by (namespace, selector)
    pods: BTreeMap<(String, String), Vec<FakePod>>,
    deleted_pods: Vec<String>,
    crd_versions: BTreeMap<String, String>,
    custom_resources: BTreeMap<(String, String), serde_json::Value>,
}

/// Cluster whose state lives in memory
pub struct FakeCluster {
    context: String,
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new(context: &str) -> Self {
        Self {
            context: context.to_string(),
            state: Mutex::new(ClusterState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<SecretData> {
        self.state()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn put_secret(&self, namespace: &str, name: &str, entries: &[(&str, &str)]) {
        let data = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect();
        self.state()
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
    }

    /// Number of secret creates and updates seen
    pub fn secret_writes(&self) -> usize {
        self.state().secret_writes
    }

    /// Register a workload that is ready with `replicas` pods
    pub fn ready_workload(&self, namespace: &str, name: &str, replicas: i32) {
        let selector = format!("app={}", name);
        let pods = (0..replicas)
            .map(|i| FakePod {
                name: format!("{}-{}", name, i),
                logs: String::new(),
            })
            .collect();
        let mut state = self.state();
        state.workloads.insert(
            (namespace.to_string(), name.to_string()),
            WorkloadStatus {
                ready_replicas: replicas,
                selector: selector.clone(),
            },
        );
        state
            .pods
            .insert((namespace.to_string(), selector), pods);
    }

    pub fn add_pod(&self, namespace: &str, selector: &str, name: &str, logs: &str) {
        self.state()
            .pods
            .entry((namespace.to_string(), selector.to_string()))
            .or_default()
            .push(FakePod {
                name: name.to_string(),
                logs: logs.to_string(),
            });
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.state().deleted_pods.clone()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state().namespaces.contains(name)
    }

    pub fn namespace_labels(&self, name: &str) -> BTreeMap<String, String> {
        self.state().labels.get(name).cloned().unwrap_or_default()
    }

    pub fn set_crd_version(&self, crd_name: &str, version: &str) {
        self.state()
            .crd_versions
            .insert(crd_name.to_string(), version.to_string());
    }

    pub fn put_custom_resource(&self, namespace: &str, name: &str, object: serde_json::Value) {
        self.state()
            .custom_resources
            .insert((namespace.to_string(), name.to_string()), object);
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    fn context(&self) -> &str {
        &self.context
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        self.state().namespaces.insert(name.to_string());
        Ok(())
    }

    async fn label_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.state();
        if !state.namespaces.contains(name) {
            return Err(Error::cluster(format!("namespace {} not found", name)));
        }
        state
            .labels
            .entry(name.to_string())
            .or_default()
            .extend(labels.clone());
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, name: &str, data: &SecretData) -> Result<()> {
        let mut state = self.state();
        let key = (namespace.to_string(), name.to_string());
        if state.secrets.contains_key(&key) {
            return Err(Error::cluster(format!("secret {}/{} already exists", namespace, name)));
        }
        state.secrets.insert(key, data.clone());
        state.secret_writes += 1;
        Ok(())
    }

    async fn update_secret(&self, namespace: &str, name: &str, data: &SecretData) -> Result<()> {
        let mut state = self.state();
        let key = (namespace.to_string(), name.to_string());
        if !state.secrets.contains_key(&key) {
            return Err(Error::cluster(format!("secret {}/{} not found", namespace, name)));
        }
        state.secrets.insert(key, data.clone());
        state.secret_writes += 1;
        Ok(())
    }

    async fn workload_status(&self, namespace: &str, name: &str) -> Result<WorkloadStatus> {
        self.state()
            .workloads
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::cluster(format!("deployment {}/{} not found", namespace, name)))
    }

    async fn count_pods(&self, namespace: &str, selector: &str) -> Result<usize> {
        Ok(self
            .state()
            .pods
            .get(&(namespace.to_string(), selector.to_string()))
            .map_or(0, Vec::len))
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>> {
        Ok(self
            .state()
            .pods
            .get(&(namespace.to_string(), selector.to_string()))
            .map(|pods| pods.iter().map(|p| p.name.clone()).collect())
            .unwrap_or_default())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        for ((ns, _), pods) in state.pods.iter_mut() {
            if ns == namespace {
                pods.retain(|p| p.name != name);
            }
        }
        state.deleted_pods.push(name.to_string());
        Ok(())
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String> {
        self.state()
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .flat_map(|(_, pods)| pods.iter())
            .find(|p| p.name == name)
            .map(|p| p.logs.clone())
            .ok_or_else(|| Error::cluster(format!("pod {}/{} not found", namespace, name)))
    }

    async fn served_stored_version(&self, crd_name: &str) -> Result<Option<String>> {
        Ok(self.state().crd_versions.get(crd_name).cloned())
    }

    async fn get_custom_resource(
        &self,
        _resource: &CustomResourceType,
        _version: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>> {
        Ok(self
            .state()
            .custom_resources
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// One recorded helm operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCall {
    pub verb: &'static str,
    pub release: String,
    pub namespace: String,
}

struct DeployedRelease {
    chart: ChartRef,
    values: ValuesTree,
}

/// Pod the fake drops into a cluster when an install of `release` fails
struct FailurePod {
    release: String,
    cluster: Arc<FakeCluster>,
    namespace: String,
    selector: String,
    pod: FakePod,
}

#[derive(Default)]
struct EngineState {
    releases: BTreeMap<(String, String), DeployedRelease>,
    calls: Vec<EngineCall>,
    defaults: BTreeMap<String, ValuesTree>,
    failures: BTreeMap<String, u32>,
    failure_pods: Vec<FailurePod>,
}

/// Helm engine whose releases live in memory
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    /// Default values returned for a chart reference
    pub fn set_chart_defaults(&self, reference: &str, defaults: ValuesTree) {
        self.state().defaults.insert(reference.to_string(), defaults);
    }

    /// Make the next `times` installs or upgrades of `release` fail
    pub fn fail(&self, release: &str, times: u32) {
        self.state().failures.insert(release.to_string(), times);
    }

    /// Create a pod in `cluster` whenever an install of `release` fails
    pub fn pod_on_failure(
        &self,
        release: &str,
        cluster: Arc<FakeCluster>,
        namespace: &str,
        selector: &str,
        pod: &str,
        logs: &str,
    ) {
        self.state().failure_pods.push(FailurePod {
            release: release.to_string(),
            cluster,
            namespace: namespace.to_string(),
            selector: selector.to_string(),
            pod: FakePod {
                name: pod.to_string(),
                logs: logs.to_string(),
            },
        });
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    /// Verbs applied to one release, in order
    pub fn verbs(&self, release: &str) -> Vec<&'static str> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.release == release)
            .map(|c| c.verb)
            .collect()
    }

    pub fn values_of(&self, namespace: &str, release: &str) -> Option<ValuesTree> {
        self.state()
            .releases
            .get(&(namespace.to_string(), release.to_string()))
            .map(|r| r.values.clone())
    }

    pub fn chart_of(&self, namespace: &str, release: &str) -> Option<ChartRef> {
        self.state()
            .releases
            .get(&(namespace.to_string(), release.to_string()))
            .map(|r| r.chart.clone())
    }

    fn record(&self, verb: &'static str, release: &str, namespace: &str) {
        self.state().calls.push(EngineCall {
            verb,
            release: release.to_string(),
            namespace: namespace.to_string(),
        });
    }

    fn take_failure(&self, release: &str) -> bool {
        let mut state = self.state();
        match state.failures.get_mut(release) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn deploy(
        &self,
        verb: &'static str,
        release: &str,
        namespace: &str,
        chart: &ChartRef,
        values: &ValuesTree,
    ) -> Result<()> {
        self.record(verb, release, namespace);
        if self.take_failure(release) {
            let state = self.state();
            for hook in state.failure_pods.iter().filter(|h| h.release == release) {
                hook.cluster
                    .add_pod(&hook.namespace, &hook.selector, &hook.pod.name, &hook.pod.logs);
            }
            // a failed install still leaves a release record behind
            drop(state);
            if verb == "install" {
                self.store(release, namespace, chart, values);
            }
            return Err(Error::engine(format!("{} {} failed", verb, release)));
        }
        self.store(release, namespace, chart, values);
        Ok(())
    }

    fn store(&self, release: &str, namespace: &str, chart: &ChartRef, values: &ValuesTree) {
        self.state().releases.insert(
            (namespace.to_string(), release.to_string()),
            DeployedRelease {
                chart: chart.clone(),
                values: values.clone(),
            },
        );
    }
}

#[async_trait]
impl PackageEngine for FakeEngine {
    async fn list_releases(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .state()
            .releases
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn chart_defaults(&self, chart: &ChartRef) -> Result<ValuesTree> {
        Ok(self
            .state()
            .defaults
            .get(&chart.reference)
            .cloned()
            .unwrap_or_default())
    }

    async fn install(
        &self,
        release: &str,
        namespace: &str,
        chart: &ChartRef,
        values: &ValuesTree,
    ) -> Result<()> {
        if self
            .state()
            .releases
            .contains_key(&(namespace.to_string(), release.to_string()))
        {
            self.record("install", release, namespace);
            return Err(Error::engine(format!(
                "cannot re-use a name that is still in use: {}",
                release
            )));
        }
        self.deploy("install", release, namespace, chart, values)
    }

    async fn upgrade(
        &self,
        release: &str,
        namespace: &str,
        chart: &ChartRef,
        values: &ValuesTree,
    ) -> Result<()> {
        self.deploy("upgrade", release, namespace, chart, values)
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        self.record("uninstall", release, namespace);
        self.state()
            .releases
            .remove(&(namespace.to_string(), release.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::engine(format!("release {} not found", release)))
    }
}
