//! Credential secret provisioning
//!
//! The portal reads its passwords from one secret, `orchestra-secrets-source`,
//! in its namespace. [`ensure_secret`] creates it on the first run and
//! updates it in place afterwards, leaving keys it does not own untouched.
//! All inputs are read and validated before anything is written, so a run
//! that fails validation leaves the cluster as it was.

use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use crate::cluster::{ClusterApi, SecretData};
use crate::values::PortalValues;
use crate::{Error, Result, CREDENTIALS_SECRET_NAME, GENERATED_SECRET_LENGTH};

/// Shared secret between the portal and its database-backed session store
pub const DB_SECRET_KEY: &str = "K8S_DB_SECRET";
/// Password of the portal's keystore
pub const KEYSTORE_PASSWORD_KEY: &str = "unisonKeystorePassword";
/// Password of the provisioning database
pub const JDBC_PASSWORD_KEY: &str = "OU_JDBC_PASSWORD";
/// Password of the SMTP relay used by provisioning workflows
pub const SMTP_PASSWORD_KEY: &str = "SMTP_PASSWORD";

/// Generate a random alphanumeric secret
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LENGTH)
        .map(char::from)
        .collect()
}

/// Secret material supplied from outside the values document
#[derive(Debug, Clone, Default)]
pub struct SecretInputs {
    /// File holding the authentication method's secret
    pub secret_file: Option<PathBuf>,
    /// File holding the provisioning database password
    pub db_password_file: Option<PathBuf>,
    /// File holding the SMTP password
    pub smtp_password_file: Option<PathBuf>,
    /// Authentication secret that wins over the file and any inline value.
    /// A federation run sets this to the secret registered on the control
    /// plane, which the satellite must present verbatim.
    pub client_secret: Option<String>,
}

/// What [`ensure_secret`] did to the secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretAction {
    Created,
    Updated,
    Unchanged,
}

/// Result of provisioning the credential secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub action: SecretAction,
    /// Keys whose value was added or replaced, sorted
    pub changed_keys: Vec<String>,
}

async fn read_trimmed(path: &Path, what: &str) -> Result<String> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::configuration(format!(
            "failed to read {} from {}: {}",
            what,
            path.display(),
            e
        ))
    })?;
    Ok(content.trim().to_string())
}

async fn read_optional(path: Option<&Path>, what: &str) -> Result<Option<String>> {
    match path {
        Some(p) => Ok(Some(read_trimmed(p, what).await?)),
        None => Ok(None),
    }
}

/// Create or update the credential secret in `namespace`.
///
/// The authentication secret is taken from, in order: `inputs.client_secret`,
/// the secret file, the inline value in the values document, and finally
/// whatever the secret already holds. The database and keystore passwords
/// are generated once and never rotated.
pub async fn ensure_secret<C: ClusterApi + ?Sized>(
    cluster: &C,
    namespace: &str,
    values: &PortalValues,
    inputs: &SecretInputs,
) -> Result<Applied> {
    let method = values
        .auth_method()
        .ok_or(Error::NoAuthenticationConfigured)?;

    let from_file = read_optional(inputs.secret_file.as_deref(), "secret").await?;
    let db_password =
        read_optional(inputs.db_password_file.as_deref(), "database password").await?;
    let smtp_password = read_optional(inputs.smtp_password_file.as_deref(), "smtp password").await?;

    let existing = cluster.get_secret(namespace, CREDENTIALS_SECRET_NAME).await?;
    let mut data = existing.clone().unwrap_or_default();

    for key in [DB_SECRET_KEY, KEYSTORE_PASSWORD_KEY] {
        if !data.contains_key(key) {
            debug!(key, "Generating password");
            data.insert(key.to_string(), generate_secret().into_bytes());
        }
    }

    if let Some(key) = method.secret_key() {
        let supplied = inputs
            .client_secret
            .clone()
            .or(from_file)
            .or_else(|| values.inline_secret(method).map(str::to_string));
        match supplied {
            Some(secret) => {
                data.insert(key.to_string(), secret.into_bytes());
            }
            None if data.contains_key(key) => {}
            None => {
                return Err(Error::missing_secret(
                    key,
                    format!(
                        "pass --secrets-file-path or set a secret in the {} section",
                        method.section()
                    ),
                ))
            }
        }
    }

    if values.openunison.enable_provisioning {
        require(
            &mut data,
            JDBC_PASSWORD_KEY,
            db_password,
            "pass --database-secret-path",
        )?;
        require(
            &mut data,
            SMTP_PASSWORD_KEY,
            smtp_password,
            "pass --smtp-secret-path",
        )?;
    }

    let changed_keys = changed_keys(existing.as_ref(), &data);
    let action = match existing {
        None => {
            cluster
                .create_secret(namespace, CREDENTIALS_SECRET_NAME, &data)
                .await?;
            SecretAction::Created
        }
        Some(_) if !changed_keys.is_empty() => {
            cluster
                .update_secret(namespace, CREDENTIALS_SECRET_NAME, &data)
                .await?;
            SecretAction::Updated
        }
        Some(_) => SecretAction::Unchanged,
    };

    info!(
        namespace,
        secret = CREDENTIALS_SECRET_NAME,
        action = ?action,
        changed = changed_keys.len(),
        "Credential secret provisioned"
    );
    Ok(Applied {
        action,
        changed_keys,
    })
}

/// Store a supplied value, or keep the stored one, or fail naming the key
fn require(data: &mut SecretData, key: &str, supplied: Option<String>, hint: &str) -> Result<()> {
    match supplied {
        Some(value) => {
            data.insert(key.to_string(), value.into_bytes());
            Ok(())
        }
        None if data.contains_key(key) => Ok(()),
        None => Err(Error::missing_secret(key, hint)),
    }
}

fn changed_keys(before: Option<&SecretData>, after: &SecretData) -> Vec<String> {
    after
        .iter()
        .filter(|(k, v)| before.and_then(|b| b.get(*k)) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect()
}
