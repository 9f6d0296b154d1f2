use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use searchdesk_auth::oauth::copilot::{
    self as copilot_auth, CopilotTokenSource, COPILOT_API_VERSION, COPILOT_INTEGRATION_ID,
    PROVIDER_NAME,
};
use searchdesk_auth::oauth::open_verification_page;
use searchdesk_auth::{
    ConnectMode, Credential, CredentialCache, DeviceAuthClient, DeviceAuthSession,
    DeviceAuthState, HttpRequest, TokenBroker, TokenStore, Transport,
};

use crate::chat::{build_body, completions_url, send_with_reauth};
use crate::types::*;
use crate::Provider;

const DEFAULT_MODEL: &str = "gpt-4o";

pub fn copilot_models() -> Vec<ModelInfo> {
    let model = |id: &str, name: &str, context_window: u32, max_output_tokens: u32| ModelInfo {
        id: id.into(),
        name: name.into(),
        provider: PROVIDER_NAME.into(),
        context_window,
        max_output_tokens,
        supports_tools: true,
    };
    vec![
        model("gpt-4o", "GPT-4o", 128_000, 16_384),
        model("gpt-4.1", "GPT-4.1", 128_000, 32_768),
        model("o3-mini", "o3-mini", 200_000, 100_000),
        model("claude-sonnet-4", "Claude Sonnet 4", 128_000, 16_000),
        model("gemini-2.0-flash-001", "Gemini 2.0 Flash", 128_000, 8_192),
    ]
}

/// GitHub Copilot chat. The GitHub credential (device flow or personal token)
/// is exchanged for a short-lived Copilot token by the broker.
pub struct CopilotProvider {
    transport: Arc<dyn Transport>,
    device: DeviceAuthClient,
    broker: TokenBroker,
    credential: CredentialCache,
    base_url: Option<String>,
    fallback_url: String,
    default_model: String,
    models: Vec<ModelInfo>,
}

impl CopilotProvider {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &searchdesk_config::Config,
        credential: CredentialCache,
    ) -> Self {
        let source = CopilotTokenSource::new(transport.clone(), config.auth.token_exchange_url.clone());
        Self {
            device: DeviceAuthClient::new(transport.clone(), copilot_auth::device_endpoints(&config.auth)),
            broker: TokenBroker::new(Arc::new(source)),
            transport,
            credential,
            base_url: config.base_url_override(PROVIDER_NAME),
            fallback_url: searchdesk_config::find_provider_def(PROVIDER_NAME)
                .map(|def| def.default_base_url.to_string())
                .unwrap_or_default(),
            default_model: config
                .model_for(PROVIDER_NAME)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            models: copilot_models(),
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

    /// Device flow progress, for a UI that shows "waiting for approval".
    pub fn device_state(&self) -> tokio::sync::watch::Receiver<DeviceAuthState> {
        self.device.subscribe()
    }

    fn chat_request(&self, token: &searchdesk_auth::CachedToken, body: &serde_json::Value) -> HttpRequest {
        let endpoint = self
            .base_url
            .as_deref()
            .or(token.endpoint.as_deref())
            .unwrap_or(&self.fallback_url);

        let mut req = HttpRequest::post(completions_url(endpoint))
            .header("Authorization", format!("Bearer {}", token.value))
            .header("Copilot-Integration-Id", COPILOT_INTEGRATION_ID)
            .header("OpenAI-Intent", "conversation-panel")
            .header("x-github-api-version", COPILOT_API_VERSION)
            .header("x-request-id", uuid::Uuid::new_v4().to_string())
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");
        for (k, v) in copilot_auth::copilot_headers() {
            req = req.header(k, v);
        }
        req.json(body.clone())
    }
}

#[async_trait]
impl Provider for CopilotProvider {
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
            ConnectMode::Token(token) => {
                self.credential.set(Credential::Token(token))?;
                self.broker.clear().await;
                tracing::info!(provider = PROVIDER_NAME, "Connected with personal token");
                Ok(AuthResult::Connected)
            }
            ConnectMode::DeviceCode => Ok(AuthResult::PendingApproval(self.device.start().await?)),
            ConnectMode::Browser => {
                let session = self.device.start().await?;
                open_verification_page(&session);
                Ok(AuthResult::PendingApproval(session))
            }
        }
    }

    async fn complete_device_login(&self, session: &DeviceAuthSession) -> Result<()> {
        let token = self.device.poll(session).await?;
        self.credential.set(Credential::OAuth(token))?;
        self.broker.clear().await;
        tracing::info!(provider = PROVIDER_NAME, "Connected via device authorization");
        Ok(())
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
        self.device.cancel();
        self.broker.clear().await;
        self.credential.clear()?;
        tracing::info!(provider = PROVIDER_NAME, "Signed out");
        Ok(())
    }
}
