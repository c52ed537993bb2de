//! Workload readiness polling
//!
//! A workload counts as ready only when both of these hold on the same poll:
//! the Deployment reports at least `desired` ready replicas, and exactly
//! `desired` pods match its selector. The pod count catches a rollout where
//! new pods are ready while old ones are still terminating.

use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Poll until `workload` in `namespace` is ready with `desired` replicas.
///
/// Query errors abort at once; only "not ready yet" is retried. After the
/// policy's attempts are used up the result is [`Error::ReadinessTimeout`].
pub async fn wait_ready<C: ClusterApi + ?Sized>(
    cluster: &C,
    policy: &RetryPolicy,
    namespace: &str,
    workload: &str,
    desired: i32,
) -> Result<()> {
    let desired_pods = usize::try_from(desired.max(0)).unwrap_or_default();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let status = cluster.workload_status(namespace, workload).await?;
        let pods = cluster.count_pods(namespace, &status.selector).await?;

        if status.ready_replicas >= desired && pods == desired_pods {
            info!(namespace, workload, desired, attempt, "Workload ready");
            return Ok(());
        }

        debug!(
            namespace,
            workload,
            ready = status.ready_replicas,
            pods,
            desired,
            attempt,
            "Workload not ready"
        );

        if !policy.has_next(attempt) {
            return Err(Error::ReadinessTimeout {
                namespace: namespace.to_string(),
                workload: workload.to_string(),
                attempts: attempt,
            });
        }
        policy.pause().await;
    }
}
