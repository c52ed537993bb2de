//! Shared setup for the kind tests

use ouctl::cluster::KubeCluster;

/// Context used when `OUCTL_TEST_CONTEXT` is unset
pub const DEFAULT_TEST_CONTEXT: &str = "kind-ouctl-test";

/// Connect to the test cluster
pub async fn test_cluster() -> KubeCluster {
    let context =
        std::env::var("OUCTL_TEST_CONTEXT").unwrap_or_else(|_| DEFAULT_TEST_CONTEXT.to_string());
    KubeCluster::connect(Some(&context))
        .await
        .unwrap_or_else(|e| panic!("failed to connect to {}: {}", context, e))
}

/// Namespace name unique to one test run
pub fn unique_namespace(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!("{}-{:08x}", prefix, nanos)
}
