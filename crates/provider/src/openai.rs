use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use searchdesk_auth::{
    AuthError, CachedToken, ConnectMode, Credential, CredentialCache, DeviceAuthSession,
    HttpRequest, PassthroughTokenSource, TokenBroker, TokenStore, Transport,
};

use crate::chat::{build_body, completions_url, send_with_reauth};
use crate::types::*;
use crate::Provider;

const PROVIDER_NAME: &str = "openai";
const DEFAULT_MODEL: &str = "gpt-4o";

pub fn default_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo {
            id: "gpt-4o".into(),
            name: "GPT-4o".into(),
            provider: PROVIDER_NAME.into(),
            context_window: 128_000,
            max_output_tokens: 16_384,
            supports_tools: true,
        },
        ModelInfo {
            id: "gpt-4o-mini".into(),
            name: "GPT-4o mini".into(),
            provider: PROVIDER_NAME.into(),
            context_window: 128_000,
            max_output_tokens: 16_384,
            supports_tools: true,
        },
        ModelInfo {
            id: "gpt-4.1".into(),
            name: "GPT-4.1".into(),
            provider: PROVIDER_NAME.into(),
            context_window: 1_047_576,
            max_output_tokens: 32_768,
            supports_tools: true,
        },
    ]
}

/// OpenAI-compatible chat completions with an API key used directly as the
/// bearer token.
pub struct OpenAIProvider {
    transport: Arc<dyn Transport>,
    broker: TokenBroker,
    credential: CredentialCache,
    base_url: String,
    default_model: String,
    models: Vec<ModelInfo>,
}

impl OpenAIProvider {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &searchdesk_config::Config,
        credential: CredentialCache,
    ) -> Self {
        Self {
            transport,
            broker: TokenBroker::new(Arc::new(PassthroughTokenSource)),
            credential,
            base_url: config.base_url_for(PROVIDER_NAME).unwrap_or_default(),
            default_model: config
                .model_for(PROVIDER_NAME)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            models: default_models(),
        }
    }

    pub fn from_config(
        config: &searchdesk_config::Config,
        transport: Arc<dyn Transport>,
        store: TokenStore,
    ) -> Self {
        let config_key = config.provider.entry(PROVIDER_NAME).and_then(|e| e.api_key.as_deref());
        let existing = searchdesk_auth::resolve_credential(PROVIDER_NAME, config_key, &store).ok();
        let credential = CredentialCache::new(PROVIDER_NAME)
            .with_store(store)
            .with_credential(existing);
        Self::new(transport, config, credential)
    }

    fn chat_request(&self, token: &CachedToken, body: &serde_json::Value) -> HttpRequest {
        HttpRequest::post(completions_url(&self.base_url))
            .header("Authorization", format!("Bearer {}", token.value))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(body.clone())
    }

    fn unsupported(mode: &str) -> anyhow::Error {
        AuthError::UnsupportedMode {
            provider: PROVIDER_NAME.to_string(),
            mode: mode.to_string(),
        }
        .into()
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn id(&self) -> &str {
        PROVIDER_NAME
    }

    fn supported_models(&self) -> &[ModelInfo] {
        &self.models
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn is_connected(&self) -> bool {
        self.credential.get().is_some()
    }

    async fn connect(&self, mode: ConnectMode) -> Result<AuthResult> {
        match mode {
            ConnectMode::Token(key) => {
                self.credential.set(Credential::Token(key))?;
                self.broker.clear().await;
                Ok(AuthResult::Connected)
            }
            other => Err(Self::unsupported(other.as_str())),
        }
    }

    async fn complete_device_login(&self, _session: &DeviceAuthSession) -> Result<()> {
        Err(Self::unsupported(ConnectMode::DeviceCode.as_str()))
    }

    async fn send_message_streaming(
        &self,
        request: &ChatRequest,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<StreamReply> {
        let credential = self.credential.require()?;
        let body = build_body(request, &self.default_model);
        send_with_reauth(
            self.transport.as_ref(),
            &self.broker,
            credential.secret(),
            |token| self.chat_request(token, &body),
            on_delta,
        )
        .await
    }

    async fn sign_out(&self) -> Result<()> {
        self.broker.clear().await;
        self.credential.clear()
    }
}
