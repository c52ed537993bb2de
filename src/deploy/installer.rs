//! Retrying release installer and upgrader
//!
//! Helm operations fail transiently (webhooks not yet serving, CRDs not yet
//! established, API throttling). A failed install leaves a half-created release
//! that blocks the next install under the same name, so it is uninstalled
//! before retrying. A failed upgrade is retried in place.

use tracing::{info, warn};

use crate::helm::{release_exists, ChartRef, PackageEngine};
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::values::ValuesTree;
use crate::{Error, Result};

/// Which operation install-or-upgrade chose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    Install,
    Upgrade,
}

/// One release to deploy
#[derive(Debug, Clone, Copy)]
pub struct ReleaseRequest<'a> {
    pub release: &'a str,
    pub namespace: &'a str,
    pub chart: &'a ChartRef,
    pub values: &'a ValuesTree,
}

/// Install a release, uninstalling the partial release after each failure.
///
/// An uninstall failure aborts immediately with that error. Once the policy
/// is exhausted the last install error is reported as [`Error::DeployFailed`].
pub async fn install<E: PackageEngine + ?Sized>(
    engine: &E,
    policy: &RetryPolicy,
    request: ReleaseRequest<'_>,
) -> Result<()> {
    let ReleaseRequest {
        release,
        namespace,
        chart,
        values,
    } = request;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        info!(release, namespace, chart = %chart, attempt, "Installing release");

        let err = match engine.install(release, namespace, chart, values).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        warn!(release, attempt, error = %err, "Install failed, removing partial release");
        engine.uninstall(release, namespace).await?;

        if !policy.has_next(attempt) {
            return Err(Error::DeployFailed {
                release: release.to_string(),
                attempts: attempt,
                last_error: err.to_string(),
            });
        }
        policy.pause().await;
    }
}

/// Upgrade a release in place, retrying on failure
pub async fn upgrade<E: PackageEngine + ?Sized>(
    engine: &E,
    policy: &RetryPolicy,
    request: ReleaseRequest<'_>,
) -> Result<()> {
    let ReleaseRequest {
        release,
        namespace,
        chart,
        values,
    } = request;
    info!(release, namespace, chart = %chart, "Upgrading release");

    retry_with_policy(policy, &format!("upgrade {}", release), || {
        engine.upgrade(release, namespace, chart, values)
    })
    .await
    .map_err(|(attempts, e)| Error::DeployFailed {
        release: release.to_string(),
        attempts,
        last_error: e.to_string(),
    })
}

/// Upgrade the release if it exists, install it otherwise.
///
/// Existence is queried once; the answer is not rechecked between attempts.
pub async fn install_or_upgrade<E: PackageEngine + ?Sized>(
    engine: &E,
    policy: &RetryPolicy,
    request: ReleaseRequest<'_>,
) -> Result<ReleaseAction> {
    if release_exists(engine, request.namespace, request.release).await? {
        upgrade(engine, policy, request).await?;
        Ok(ReleaseAction::Upgrade)
    } else {
        install(engine, policy, request).await?;
        Ok(ReleaseAction::Install)
    }
}
