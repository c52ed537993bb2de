//! Stories about the API operations ouctl performs before any release exists

use std::collections::BTreeMap;

use ouctl::cluster::ClusterApi;
use ouctl::credentials::{ensure_secret, SecretAction, SecretInputs};
use ouctl::values::ValuesDocument;
use ouctl::CREDENTIALS_SECRET_NAME;

use super::helpers::{test_cluster, unique_namespace};

/// Story: an operator installs the portal twice in a row
///
/// The first run creates the namespace and the credential secret with
/// generated passwords. The second run finds both and changes nothing.
#[tokio::test]
#[ignore]
async fn story_credential_secret_survives_a_rerun() {
    let cluster = test_cluster().await;
    let namespace = unique_namespace("ouctl-creds");
    let values = ValuesDocument::from_yaml(
        "values.yaml",
        "saml: {idp_url: https://idp.example.com/metadata}\n",
    )
    .unwrap();

    cluster.ensure_namespace(&namespace).await.unwrap();
    cluster.ensure_namespace(&namespace).await.unwrap();

    let first = ensure_secret(&cluster, &namespace, values.values(), &SecretInputs::default())
        .await
        .unwrap();
    assert_eq!(first.action, SecretAction::Created);

    let stored = cluster
        .get_secret(&namespace, CREDENTIALS_SECRET_NAME)
        .await
        .unwrap()
        .expect("secret should exist");
    assert_eq!(stored["K8S_DB_SECRET"].len(), 64);

    let second = ensure_secret(&cluster, &namespace, values.values(), &SecretInputs::default())
        .await
        .unwrap();
    assert_eq!(second.action, SecretAction::Unchanged);
}

/// Story: the portal namespace joins a service mesh
#[tokio::test]
#[ignore]
async fn story_namespace_labels_are_applied() {
    let cluster = test_cluster().await;
    let namespace = unique_namespace("ouctl-labels");
    cluster.ensure_namespace(&namespace).await.unwrap();

    let labels = BTreeMap::from([("istio-injection".to_string(), "enabled".to_string())]);
    cluster.label_namespace(&namespace, &labels).await.unwrap();
    // reapplying is a no-op
    cluster.label_namespace(&namespace, &labels).await.unwrap();
}

/// Story: lookups that miss are answers, not failures
#[tokio::test]
#[ignore]
async fn story_missing_objects_are_none() {
    let cluster = test_cluster().await;
    let namespace = unique_namespace("ouctl-missing");
    cluster.ensure_namespace(&namespace).await.unwrap();

    assert!(cluster
        .get_secret(&namespace, "does-not-exist")
        .await
        .unwrap()
        .is_none());
    assert!(cluster
        .list_pods(&namespace, "job-name=check-ou-config")
        .await
        .unwrap()
        .is_empty());
    cluster.delete_pod(&namespace, "does-not-exist").await.unwrap();
    assert!(cluster
        .served_stored_version("widgets.nothing.example.com")
        .await
        .unwrap()
        .is_none());
    assert_eq!(cluster.count_pods(&namespace, "app=none").await.unwrap(), 0);
}
