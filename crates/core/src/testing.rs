//! Scripted [`Provider`] and [`ToolExecutor`] doubles for loop tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use searchdesk_auth::{ConnectMode, DeviceAuthSession};
use searchdesk_provider::{AuthResult, ChatRequest, FunctionCall, ModelInfo, Provider, StreamReply};

use crate::tools::{ToolCall, ToolExecutor, ToolOutput};

#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<StreamReply>>>,
    requests: Mutex<Vec<ChatRequest>>,
    signed_out: Mutex<bool>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(self, content: &str) -> Self {
        self.push(Ok(StreamReply::text(content)))
    }

    pub fn call(self, name: &str, arguments: &str) -> Self {
        self.push(Ok(StreamReply {
            content: String::new(),
            function_call: Some(FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            }),
        }))
    }

    pub fn fail(self, message: &str) -> Self {
        self.push(Err(anyhow::anyhow!(message.to_string())))
    }

    fn push(self, reply: Result<StreamReply>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn signed_out(&self) -> bool {
        *self.signed_out.lock().unwrap()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn supported_models(&self) -> &[ModelInfo] {
        &[]
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    fn is_connected(&self) -> bool {
        !self.signed_out()
    }

    async fn connect(&self, _mode: ConnectMode) -> Result<AuthResult> {
        Ok(AuthResult::Connected)
    }

    async fn complete_device_login(&self, _session: &DeviceAuthSession) -> Result<()> {
        Ok(())
    }

    async fn send_message_streaming(
        &self,
        request: &ChatRequest,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<StreamReply> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted reply left")))?;
        if !reply.content.is_empty() {
            on_delta(&reply.content);
        }
        Ok(reply)
    }

    async fn sign_out(&self) -> Result<()> {
        *self.signed_out.lock().unwrap() = true;
        Ok(())
    }
}

/// Returns a fixed output for every call and records what it was asked.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<ToolCall>>,
    fail_with: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(call.clone());
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }
        Ok(ToolOutput {
            label: call.describe(),
            data: serde_json::json!({"tool": call.name()}),
        })
    }
}
