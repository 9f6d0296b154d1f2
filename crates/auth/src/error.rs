#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No credential found for provider '{provider}'. Set {env_var}{hint}")]
    NoCredential {
        provider: String,
        env_var: String,
        hint: String,
    },

    #[error("Could not start device authorization: {0}")]
    Start(String),

    #[error("Authorization was denied: {0}")]
    Denied(String),

    #[error("Device code expired before authorization completed. Please try again.")]
    Expired,

    #[error("Device authorization was cancelled")]
    Cancelled,

    #[error("Token acquisition failed: {0}")]
    TokenAcquisition(String),

    #[error("Provider '{provider}' does not support {mode} sign-in")]
    UnsupportedMode { provider: String, mode: String },
}
