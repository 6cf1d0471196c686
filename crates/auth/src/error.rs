#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no API key found for provider '{provider}'. Set {env_var} or configure provider.api_key in the review config")]
    NoApiKey { provider: String, env_var: String },

    #[error("keyring error: {0}")]
    KeyringError(String),
}
