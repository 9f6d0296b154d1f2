use anyhow::Result;
use tokio::sync::broadcast;

use searchdesk_provider::{ChatMessage, ChatRequest, ChatSettings, Provider, StreamReply};

use crate::conversation::Conversation;
use crate::tools::{self, ToolCall, ToolError, ToolExecutor};

pub const STEP_LIMIT_REPLY: &str = "I could not complete this request: it needed more resource \
lookups than allowed in a single turn. Try narrowing the question.";

#[derive(Debug, Clone)]
pub enum AgentEvent {
    TextDelta(String),
    ToolCallStart {
        name: String,
        description: String,
    },
    ToolCallDone {
        name: String,
        label: String,
        elapsed_ms: u64,
    },
    StepLimitReached {
        steps: u32,
    },
    TurnComplete,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Upper bound on model round trips per turn.
    pub max_tool_steps: u32,
}

impl AgentConfig {
    pub fn from_settings(settings: &searchdesk_config::AssistantSettings) -> Self {
        Self {
            max_tool_steps: settings.max_tool_steps,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_settings(&searchdesk_config::AssistantSettings::default())
    }
}

/// Runs the model/tool loop until the model answers without a usable tool
/// call or the step limit is hit.
///
/// Each executed tool adds two turns to `conversation` (the call and its
/// result). The final reply is returned, not appended. Provider and executor
/// errors end the turn and are returned as-is.
pub async fn run_turn(
    provider: &dyn Provider,
    conversation: &mut Conversation,
    settings: &ChatSettings,
    executor: &dyn ToolExecutor,
    config: &AgentConfig,
    event_tx: &broadcast::Sender<AgentEvent>,
) -> Result<StreamReply> {
    let max_steps = config.max_tool_steps.max(1);
    let tool_defs = tools::definitions();

    for step in 0..max_steps {
        let request = ChatRequest {
            messages: conversation.messages().to_vec(),
            settings: settings.clone(),
            tools: tool_defs.clone(),
        };

        let reply = provider
            .send_message_streaming(&request, &mut |delta: &str| {
                let _ = event_tx.send(AgentEvent::TextDelta(delta.to_string()));
            })
            .await?;

        let Some(function_call) = reply.function_call.clone() else {
            let _ = event_tx.send(AgentEvent::TurnComplete);
            return Ok(reply);
        };

        let call = match ToolCall::parse(&function_call) {
            Ok(call) => call,
            Err(e) => {
                tracing::warn!(tool = %function_call.name, error = %e, "Ignoring unusable tool call");
                let _ = event_tx.send(AgentEvent::TurnComplete);
                return Ok(reply);
            }
        };

        if step + 1 >= max_steps {
            break;
        }

        let description = call.describe();
        tracing::debug!(step, tool = call.name(), %description, "Executing tool");
        let _ = event_tx.send(AgentEvent::ToolCallStart {
            name: call.name().to_string(),
            description: description.clone(),
        });

        let start = std::time::Instant::now();
        let output = executor.execute(&call).await.map_err(|e| match e.downcast::<ToolError>() {
            Ok(tool_error) => anyhow::Error::from(tool_error),
            Err(other) => ToolError::Execution(format!("{other:#}")).into(),
        })?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let _ = event_tx.send(AgentEvent::ToolCallDone {
            name: call.name().to_string(),
            label: output.label.clone(),
            elapsed_ms,
        });

        conversation.push_message(ChatMessage::tool_call(&function_call, format!("{description}...")));
        conversation.push_message(ChatMessage::tool_result(call.name(), output.label, output.data));
    }

    tracing::warn!(steps = max_steps, "Tool loop reached its step limit");
    let _ = event_tx.send(AgentEvent::StepLimitReached { steps: max_steps });
    let _ = event_tx.send(AgentEvent::TurnComplete);
    Ok(StreamReply::text(STEP_LIMIT_REPLY))
}
