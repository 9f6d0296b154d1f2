pub mod types;

pub mod copilot;
pub mod openai;
pub mod sse;

mod chat;
mod error;

pub use error::ProviderError;
pub use types::*;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use searchdesk_auth::{ConnectMode, DeviceAuthSession, TokenStore, Transport};

/// A chat backend together with its sign-in flow.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;
    fn supported_models(&self) -> &[ModelInfo];
    fn default_model(&self) -> &str;

    /// Whether a credential is currently held (not whether it is still accepted).
    fn is_connected(&self) -> bool;

    /// Token mode stores the credential immediately. Device and browser modes
    /// return the code to show; finish with [`Provider::complete_device_login`].
    async fn connect(&self, mode: ConnectMode) -> Result<AuthResult>;

    async fn complete_device_login(&self, session: &DeviceAuthSession) -> Result<()>;

    async fn send_message(&self, request: &ChatRequest) -> Result<StreamReply> {
        self.send_message_streaming(request, &mut |_: &str| {}).await
    }

    async fn send_message_streaming(
        &self,
        request: &ChatRequest,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<StreamReply>;

    /// Cancels any pending device poll and forgets both the service token and
    /// the stored credential.
    async fn sign_out(&self) -> Result<()>;
}

pub const PROVIDER_IDS: &[&str] = &["github-copilot", "openai"];

pub fn create_provider(
    id: &str,
    config: &searchdesk_config::Config,
    transport: Arc<dyn Transport>,
    store: TokenStore,
) -> Result<Box<dyn Provider>> {
    match id {
        "github-copilot" => Ok(Box::new(copilot::CopilotProvider::from_config(config, transport, store))),
        "openai" => Ok(Box::new(openai::OpenAIProvider::from_config(config, transport, store))),
        other => anyhow::bail!(
            "Unknown provider: {other} (available: {})",
            PROVIDER_IDS.join(", ")
        ),
    }
}
