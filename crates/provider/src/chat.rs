//! Request building and the authenticated streaming round trip shared by the
//! chat-completions providers.

use anyhow::Result;
use serde_json::{json, Value};

use searchdesk_auth::{CachedToken, HttpRequest, TokenBroker, Transport};

use crate::sse::decode_stream_with;
use crate::types::*;
use crate::ProviderError;

pub(crate) fn completions_url(base: &str) -> String {
    format!("{}/chat/completions", base.trim_end_matches('/'))
}

/// Converts the conversation to the wire format: system prompt first, tool
/// results as `function` turns, and tool-call turns with their `function_call`.
pub(crate) fn wire_messages(request: &ChatRequest) -> Vec<Value> {
    let mut msgs = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.settings.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        msgs.push(json!({"role": "system", "content": system}));
    }

    for msg in &request.messages {
        msgs.push(match msg.role {
            Role::Tool => json!({
                "role": "function",
                "name": msg.tool_name.as_deref().unwrap_or_default(),
                "content": msg
                    .data
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| msg.content.clone()),
            }),
            Role::Assistant => match msg.function_call() {
                Some(call) => json!({
                    "role": "assistant",
                    "content": Value::Null,
                    "function_call": {"name": call.name, "arguments": call.arguments},
                }),
                None => json!({"role": "assistant", "content": msg.content}),
            },
            role => json!({"role": role.as_str(), "content": msg.content}),
        });
    }

    msgs
}

pub(crate) fn build_body(request: &ChatRequest, default_model: &str) -> Value {
    let settings = &request.settings;
    let model = if settings.model.is_empty() {
        default_model
    } else {
        &settings.model
    };

    let mut body = json!({
        "model": model,
        "temperature": settings.temperature,
        "top_p": settings.top_p,
        "n": 1,
        "stream": true,
        "max_tokens": settings.max_tokens,
        "messages": wire_messages(request),
    });

    if !request.tools.is_empty() {
        let functions: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        body["functions"] = json!(functions);
        body["function_call"] = json!("auto");
    }

    body
}

/// Sends a streaming chat request with a broker-issued token and decodes the
/// reply. A 401/403 invalidates the token and the request is retried exactly
/// once with a freshly acquired one.
pub(crate) async fn send_with_reauth<F>(
    transport: &dyn Transport,
    broker: &TokenBroker,
    credential: &str,
    build_request: F,
    on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> Result<StreamReply>
where
    F: Fn(&CachedToken) -> HttpRequest,
{
    let mut retried = false;
    loop {
        let token = broker.ensure_token(credential).await?;
        let resp = transport.send(build_request(&token)).await?;

        if resp.is_auth_failure() && !retried {
            tracing::warn!(status = resp.status, "Chat request unauthorized, re-acquiring token");
            broker.invalidate().await;
            retried = true;
            continue;
        }

        if !resp.is_success() {
            let status = resp.status;
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::ChatRequest { status, body }.into());
        }

        return decode_stream_with(resp.into_body(), |delta| on_delta(delta))
            .await
            .map_err(|e| ProviderError::Stream(e.to_string()).into());
    }
}
