pub mod api_key;

mod error;

pub use error::AuthError;

use anyhow::Result;

const KEYRING_SERVICE: &str = "sentinel-review";

#[derive(Debug, Clone)]
pub enum Credential {
    ApiKey(String),
}

impl Credential {
    pub fn header_value(&self) -> String {
        match self {
            Credential::ApiKey(key) => key.clone(),
        }
    }
}

/// Resolves a provider's API key from, in order: an explicit config value, the
/// provider's environment variable, and the local OS keyring. This system runs
/// unattended (CI, CLI) so there is no interactive login step.
pub fn resolve_credential(provider: &str, config_key: Option<&str>) -> Result<Credential> {
    if let Some(key) = config_key {
        if !key.is_empty() {
            return Ok(Credential::ApiKey(key.to_string()));
        }
    }

    if let Ok(cred) = api_key::from_env(provider) {
        return Ok(cred);
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, provider) {
        if let Ok(key) = entry.get_password() {
            if !key.is_empty() {
                return Ok(Credential::ApiKey(key));
            }
        }
    }

    Err(AuthError::NoApiKey {
        provider: provider.to_string(),
        env_var: api_key::env_var_name(provider).to_string(),
    }
    .into())
}

/// Stores a provider's API key in the local OS keyring so future runs do not
/// need the environment variable set.
pub fn store_credential(provider: &str, key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, provider)
        .map_err(|e| AuthError::KeyringError(e.to_string()))?;
    entry
        .set_password(key)
        .map_err(|e| AuthError::KeyringError(e.to_string()))?;
    Ok(())
}
