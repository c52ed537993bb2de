//! kube-rs backed [`ClusterApi`]

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::ByteString;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, LogParams,
    ObjectMeta, Patch, PatchParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use super::{selector_string, ClusterApi, CustomResourceType, SecretData, WorkloadStatus};
use crate::{Error, Result};

/// Field manager recorded on server-side applies
const FIELD_MANAGER: &str = "ouctl";

/// Connection timeout for the kube client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for the kube client
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Cluster handle bound to one kubeconfig context
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    context: String,
}

impl KubeCluster {
    /// Connect using the named context, or the kubeconfig's current context
    pub async fn connect(context: Option<&str>) -> Result<Self> {
        let kubeconfig = Kubeconfig::read()
            .map_err(|e| Error::configuration(format!("failed to read kubeconfig: {}", e)))?;

        let context = match context {
            Some(name) => name.to_string(),
            None => kubeconfig
                .current_context
                .clone()
                .ok_or_else(|| Error::not_found("kubeconfig has no current context"))?,
        };

        if !kubeconfig.contexts.iter().any(|c| c.name == context) {
            return Err(Error::not_found(format!(
                "context {} not found in kubeconfig",
                context
            )));
        }

        let options = KubeConfigOptions {
            context: Some(context.clone()),
            ..Default::default()
        };
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| {
                Error::configuration(format!("failed to load context {}: {}", context, e))
            })?;
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
        config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

        let client = Client::try_from(config)?;
        debug!(context = %context, "Connected to cluster");
        Ok(Self { client, context })
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Wrap an API failure with what was being attempted
fn api_error(action: impl fmt::Display, e: kube::Error) -> Error {
    Error::cluster(format!("{}: {}", action, e))
}

fn to_byte_strings(data: &SecretData) -> BTreeMap<String, ByteString> {
    data.iter()
        .map(|(k, v)| (k.clone(), ByteString(v.clone())))
        .collect()
}

/// Render a label selector in the list-filter syntax, covering both
/// `matchLabels` and `matchExpressions`
fn render_selector(selector: &LabelSelector) -> String {
    let mut terms = Vec::new();
    if let Some(labels) = &selector.match_labels {
        if !labels.is_empty() {
            terms.push(selector_string(labels));
        }
    }
    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.clone().unwrap_or_default().join(",");
        let term = match expr.operator.as_str() {
            "In" => format!("{} in ({})", expr.key, values),
            "NotIn" => format!("{} notin ({})", expr.key, values),
            "Exists" => expr.key.clone(),
            "DoesNotExist" => format!("!{}", expr.key),
            other => format!("{} {} ({})", expr.key, other.to_lowercase(), values),
        };
        terms.push(term);
    }
    terms.join(",")
}

#[async_trait]
impl ClusterApi for KubeCluster {
    fn context(&self) -> &str {
        &self.context
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let existing = api
            .get_opt(name)
            .await
            .map_err(|e| api_error(format_args!("get namespace {}", name), e))?;
        if existing.is_some() {
            return Ok(());
        }
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            // lost a race with another creator
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(api_error(format_args!("create namespace {}", name), e)),
        }
    }

    async fn label_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {
                "name": name,
                "labels": labels
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&patch))
            .await
            .map_err(|e| api_error(format_args!("label namespace {}", name), e))?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>> {
        let secret = self
            .secrets(namespace)
            .get_opt(name)
            .await
            .map_err(|e| api_error(format_args!("get secret {}/{}", namespace, name), e))?;
        Ok(secret.map(|s| {
            s.data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.0))
                .collect()
        }))
    }

    async fn create_secret(&self, namespace: &str, name: &str, data: &SecretData) -> Result<()> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(to_byte_strings(data)),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        self.secrets(namespace)
            .create(&PostParams::default(), &secret)
            .await
            .map_err(|e| api_error(format_args!("create secret {}/{}", namespace, name), e))?;
        Ok(())
    }

    async fn update_secret(&self, namespace: &str, name: &str, data: &SecretData) -> Result<()> {
        // re-read so labels, annotations and type on the live object survive;
        // only a write landing between this get and the replace is a 409
        let api = self.secrets(namespace);
        let mut secret = api
            .get(name)
            .await
            .map_err(|e| api_error(format_args!("get secret {}/{}", namespace, name), e))?;
        secret.data = Some(to_byte_strings(data));
        secret.string_data = None;
        api.replace(name, &PostParams::default(), &secret)
            .await
            .map_err(|e| api_error(format_args!("replace secret {}/{}", namespace, name), e))?;
        Ok(())
    }

    async fn workload_status(&self, namespace: &str, name: &str) -> Result<WorkloadStatus> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api
            .get_opt(name)
            .await
            .map_err(|e| api_error(format_args!("get deployment {}/{}", namespace, name), e))?
            .ok_or_else(|| Error::not_found(format!("deployment {}/{}", namespace, name)))?;

        let ready_replicas = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        let selector = deployment
            .spec
            .as_ref()
            .map(|s| render_selector(&s.selector))
            .unwrap_or_default();
        // an empty selector would match every pod in the namespace
        if selector.is_empty() {
            return Err(Error::cluster(format!(
                "deployment {}/{} has no pod selector",
                namespace, name
            )));
        }

        Ok(WorkloadStatus {
            ready_replicas,
            selector,
        })
    }

    async fn count_pods(&self, namespace: &str, selector: &str) -> Result<usize> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| api_error(format_args!("list pods {} in {}", selector, namespace), e))?;
        Ok(pods.items.len())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>> {
        let mut pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| api_error(format_args!("list pods {} in {}", selector, namespace), e))?
            .items;
        pods.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0)
                .cmp(&b.metadata.creation_timestamp.as_ref().map(|t| t.0))
        });
        Ok(pods.into_iter().filter_map(|p| p.metadata.name).collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(api_error(format_args!("delete pod {}/{}", namespace, name), e)),
        }
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String> {
        self.pods(namespace)
            .logs(name, &LogParams::default())
            .await
            .map_err(|e| api_error(format_args!("logs of pod {}/{}", namespace, name), e))
    }

    async fn served_stored_version(&self, crd_name: &str) -> Result<Option<String>> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let Some(crd) = api
            .get_opt(crd_name)
            .await
            .map_err(|e| api_error(format_args!("get crd {}", crd_name), e))?
        else {
            return Ok(None);
        };
        Ok(crd
            .spec
            .versions
            .into_iter()
            .find(|v| v.served && v.storage)
            .map(|v| v.name))
    }

    async fn get_custom_resource(
        &self,
        resource: &CustomResourceType,
        version: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>> {
        let gvk = GroupVersionKind::gvk(&resource.group, version, &resource.kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &resource.plural);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &ar);
        let object = api.get_opt(name).await.map_err(|e| {
            api_error(format_args!("get {} {}/{}", resource, namespace, name), e)
        })?;
        match object {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }
}
