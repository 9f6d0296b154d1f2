pub mod api_key;
pub mod broker;
pub mod device;
pub mod oauth;
pub mod token_store;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

mod error;

pub use broker::{CachedToken, IssuedToken, PassthroughTokenSource, TokenBroker, TokenSource};
pub use device::{DeviceAuthClient, DeviceAuthSession, DeviceAuthState, DeviceEndpoints};
pub use error::AuthError;
pub use token_store::{StoredToken, TokenStore};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

use std::sync::{PoisonError, RwLock};

use anyhow::Result;

/// A long-lived sign-in credential, exchanged for short-lived service tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Supplied directly by the user (personal token, API key, env var).
    Token(String),
    /// Issued by the device authorization grant.
    OAuth(String),
}

impl Credential {
    pub fn secret(&self) -> &str {
        match self {
            Credential::Token(s) | Credential::OAuth(s) => s,
        }
    }

    pub fn is_oauth(&self) -> bool {
        matches!(self, Credential::OAuth(_))
    }
}

/// How a provider should obtain its credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectMode {
    Token(String),
    DeviceCode,
    Browser,
}

impl ConnectMode {
    pub fn parse(mode: &str, token: Option<String>) -> Result<Self> {
        match mode {
            "token" => match token.filter(|t| !t.trim().is_empty()) {
                Some(t) => Ok(ConnectMode::Token(t.trim().to_string())),
                None => anyhow::bail!("token mode needs a token"),
            },
            "device_code" | "device-code" | "device" => Ok(ConnectMode::DeviceCode),
            "browser" => Ok(ConnectMode::Browser),
            other => anyhow::bail!(
                "unknown sign-in mode: {other} (use token, device_code, or browser)"
            ),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectMode::Token(_) => "token",
            ConnectMode::DeviceCode => "device_code",
            ConnectMode::Browser => "browser",
        }
    }
}

/// In-memory credential for one provider, optionally persisted to a [`TokenStore`].
pub struct CredentialCache {
    provider: String,
    current: RwLock<Option<Credential>>,
    store: Option<TokenStore>,
}

impl CredentialCache {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            current: RwLock::new(None),
            store: None,
        }
    }

    pub fn with_store(mut self, store: TokenStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_credential(self, credential: Option<Credential>) -> Self {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = credential;
        self
    }

    pub fn get(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, credential: Credential) -> Result<()> {
        if let Some(store) = &self.store {
            store.store(
                &self.provider,
                &StoredToken {
                    access_token: credential.secret().to_string(),
                    provider: self.provider.clone(),
                    from_device_flow: credential.is_oauth(),
                    stored_at: Some(chrono::Utc::now().timestamp()),
                },
            )?;
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        if let Some(store) = &self.store {
            store.remove(&self.provider)?;
        }
        Ok(())
    }

    /// The current credential, or `NoCredential` naming how to provide one.
    pub fn require(&self) -> Result<Credential> {
        self.get().ok_or_else(|| no_credential(&self.provider).into())
    }
}

fn no_credential(provider: &str) -> AuthError {
    let device_hint = searchdesk_config::find_provider_def(provider)
        .map(|d| d.supports_device_code)
        .unwrap_or(false);
    let hint = if device_hint {
        format!(", or run `searchdesk login --provider {provider}`")
    } else {
        format!(", or run `searchdesk login --provider {provider} --mode token`")
    };
    AuthError::NoCredential {
        provider: provider.to_string(),
        env_var: api_key::env_var_name(provider),
        hint,
    }
}

/// Looks up a credential: config key, then environment, then the store.
pub fn resolve_credential(
    provider: &str,
    config_key: Option<&str>,
    store: &TokenStore,
) -> Result<Credential> {
    if let Some(key) = config_key.filter(|k| !k.is_empty()) {
        return Ok(Credential::Token(key.to_string()));
    }

    if let Ok(cred) = api_key::from_env(provider) {
        return Ok(cred);
    }

    if let Ok(Some(token)) = store.load(provider) {
        return Ok(if token.from_device_flow {
            Credential::OAuth(token.access_token)
        } else {
            Credential::Token(token.access_token)
        });
    }

    Err(no_credential(provider).into())
}

/// Returns the auth status string for a provider (for UI display).
pub fn auth_status(provider: &str, store: &TokenStore) -> &'static str {
    if api_key::from_env(provider).is_ok() {
        return "env";
    }
    if let Ok(Some(_)) = store.load(provider) {
        return "connected";
    }
    "not connected"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_modes() {
        assert_eq!(
            ConnectMode::parse("token", Some(" ghp_x ".into())).unwrap(),
            ConnectMode::Token("ghp_x".into())
        );
        assert!(ConnectMode::parse("token", None).is_err());
        assert_eq!(ConnectMode::parse("device_code", None).unwrap(), ConnectMode::DeviceCode);
        assert_eq!(ConnectMode::parse("browser", None).unwrap().as_str(), "browser");
        assert!(ConnectMode::parse("saml", None).is_err());
    }

    #[test]
    fn config_key_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("auth.json"));
        let cred = resolve_credential("custom-provider", Some("key-1"), &store).unwrap();
        assert_eq!(cred, Credential::Token("key-1".into()));
    }

    #[test]
    fn stored_device_credential_resolves_as_oauth() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("auth.json"));
        let cache = CredentialCache::new("custom-provider").with_store(store.clone());
        cache.set(Credential::OAuth("gho_1".into())).unwrap();

        let cred = resolve_credential("custom-provider", None, &store).unwrap();
        assert_eq!(cred, Credential::OAuth("gho_1".into()));
        assert_eq!(auth_status("custom-provider", &store), "connected");

        cache.clear().unwrap();
        assert!(cache.get().is_none());
        let err = resolve_credential("custom-provider", None, &store).unwrap_err();
        assert!(matches!(err.downcast_ref::<AuthError>(), Some(AuthError::NoCredential { .. })));
    }

    #[test]
    fn require_explains_missing_credential() {
        let cache = CredentialCache::new("github-copilot");
        let err = cache.require().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("GITHUB_TOKEN"));
        assert!(msg.contains("searchdesk login"));
    }
}
