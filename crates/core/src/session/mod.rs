use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use searchdesk_auth::{ConnectMode, DeviceAuthSession};
use searchdesk_provider::{AuthResult, ChatMessage, ChatSettings, Provider};

use crate::agent::{self, AgentConfig, AgentEvent};
use crate::conversation::Conversation;
use crate::tools::ToolExecutor;

/// Everything one signed-in assistant needs: the provider (with its token
/// cache and device flow), the tool executor, per-request settings and the
/// conversation. Created at sign-in and dropped at sign-out; nothing is shared
/// between sessions.
pub struct AssistantSession {
    provider: Arc<dyn Provider>,
    executor: Arc<dyn ToolExecutor>,
    settings: ChatSettings,
    agent: AgentConfig,
    conversation: Conversation,
    event_tx: broadcast::Sender<AgentEvent>,
}

impl AssistantSession {
    pub fn new(
        provider: Arc<dyn Provider>,
        executor: Arc<dyn ToolExecutor>,
        config: &searchdesk_config::Config,
    ) -> Self {
        let model = config
            .model_for(provider.id())
            .unwrap_or_else(|| provider.default_model().to_string());
        let mut settings = ChatSettings::from_config(&config.assistant, model);
        settings.system_prompt = Some(crate::prompt::build_system_prompt(
            config.assistant.system_prompt.as_deref(),
        ));
        if let Some(entry) = config.provider.entry(provider.id()) {
            if let Some(t) = entry.temperature {
                settings.temperature = t;
            }
            if let Some(m) = entry.max_tokens {
                settings.max_tokens = m;
            }
        }

        let (event_tx, _) = broadcast::channel(256);
        Self {
            provider,
            executor,
            settings,
            agent: AgentConfig::from_settings(&config.assistant),
            conversation: Conversation::new(),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.settings.model = model.into();
    }

    pub async fn connect(&self, mode: ConnectMode) -> Result<AuthResult> {
        self.provider.connect(mode).await
    }

    pub async fn complete_device_login(&self, session: &DeviceAuthSession) -> Result<()> {
        self.provider.complete_device_login(session).await
    }

    /// Sends one user message and runs the tool loop. The returned message is
    /// the assistant's answer, or the error text when the turn failed; it is
    /// also the last message of the conversation.
    pub async fn send(&mut self, text: &str) -> &ChatMessage {
        self.conversation.push_message(ChatMessage::user(text));

        let result = agent::run_turn(
            self.provider.as_ref(),
            &mut self.conversation,
            &self.settings,
            self.executor.as_ref(),
            &self.agent,
            &self.event_tx,
        )
        .await;

        let message = match result {
            Ok(reply) if !reply.content.trim().is_empty() => ChatMessage::assistant(reply.content),
            Ok(reply) => match reply.function_call {
                Some(call) => ChatMessage::assistant(format!(
                    "The assistant asked to run `{}` but the request could not be used.",
                    call.name
                )),
                None => ChatMessage::assistant("(empty response)"),
            },
            Err(e) => {
                tracing::error!(error = %e, "Assistant turn failed");
                ChatMessage::assistant(format!("Error: {e:#}"))
            }
        };
        self.conversation.push_message(message)
    }

    /// Starts a fresh conversation with the same provider and settings.
    pub fn reset(&mut self) {
        self.conversation = Conversation::new();
    }

    /// Cancels device polling and forgets the service token and the stored
    /// credential. The conversation is kept for display.
    pub async fn sign_out(&self) -> Result<()> {
        self.provider.sign_out().await
    }
}
