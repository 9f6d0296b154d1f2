use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::broker::{IssuedToken, TokenSource};
use crate::device::DeviceEndpoints;
use crate::transport::{HttpRequest, Transport};
use crate::AuthError;

pub const PROVIDER_NAME: &str = "github-copilot";

pub const COPILOT_USER_AGENT: &str = "GitHubCopilotChat/0.26.7";
pub const COPILOT_EDITOR_VERSION: &str = "vscode/1.99.3";
pub const COPILOT_PLUGIN_VERSION: &str = "copilot-chat/0.26.7";
pub const COPILOT_INTEGRATION_ID: &str = "vscode-chat";
pub const COPILOT_API_VERSION: &str = "2025-04-01";

#[derive(Debug, Clone, Deserialize)]
pub struct CopilotTokenResponse {
    pub token: String,
    pub expires_at: i64,
    #[serde(default)]
    pub endpoints: CopilotEndpoints,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CopilotEndpoints {
    #[serde(default)]
    pub api: String,
}

pub fn copilot_headers() -> Vec<(String, String)> {
    vec![
        ("User-Agent".into(), COPILOT_USER_AGENT.into()),
        ("Editor-Version".into(), COPILOT_EDITOR_VERSION.into()),
        ("Editor-Plugin-Version".into(), COPILOT_PLUGIN_VERSION.into()),
    ]
}

pub fn device_endpoints(settings: &searchdesk_config::AuthSettings) -> DeviceEndpoints {
    DeviceEndpoints::from_settings(settings).with_headers(copilot_headers())
}

/// Exchanges a GitHub OAuth token for a short-lived Copilot API token.
pub struct CopilotTokenSource {
    transport: Arc<dyn Transport>,
    url: String,
}

impl CopilotTokenSource {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TokenSource for CopilotTokenSource {
    async fn acquire(&self, github_token: &str) -> Result<IssuedToken> {
        let mut req = HttpRequest::get(&self.url)
            .header("Authorization", format!("token {github_token}"))
            .header("Accept", "application/json");
        for (k, v) in copilot_headers() {
            req = req.header(k, v);
        }

        let resp = self
            .transport
            .send(req)
            .await
            .map_err(|e| AuthError::TokenAcquisition(e.to_string()))?;

        if !resp.is_success() {
            let status = resp.status;
            let body = resp.text().await.unwrap_or_default();
            if status == 401 || status == 403 {
                return Err(AuthError::TokenAcquisition(format!(
                    "{status}: Your GitHub account may not have an active Copilot \
                     subscription. Check github.com/settings/copilot"
                ))
                .into());
            }
            return Err(AuthError::TokenAcquisition(format!("{status}: {}", body.trim())).into());
        }

        let token_resp: CopilotTokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::TokenAcquisition(format!("unreadable token response: {e}")))?;

        tracing::info!(expires_at = token_resp.expires_at, "Exchanged GitHub token for Copilot token");

        Ok(IssuedToken {
            value: token_resp.token,
            expires_at: Some(token_resp.expires_at),
            endpoint: Some(token_resp.endpoints.api).filter(|api| !api.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use serde_json::json;

    const URL: &str = "https://api.github.test/copilot_internal/v2/token";

    #[tokio::test]
    async fn exchange_sends_github_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(
            200,
            json!({
                "token": "tid=abc;exp=1",
                "expires_at": 1_900_000_000i64,
                "refresh_in": 1500,
                "endpoints": {"api": "https://api.individual.githubcopilot.com"}
            }),
        );
        let source = CopilotTokenSource::new(transport.clone(), URL);

        let issued = source.acquire("gho_abc").await.unwrap();
        assert_eq!(issued.value, "tid=abc;exp=1");
        assert_eq!(issued.expires_at, Some(1_900_000_000));
        assert_eq!(
            issued.endpoint.as_deref(),
            Some("https://api.individual.githubcopilot.com")
        );

        let requests = transport.requests();
        let sent = &requests[0].request;
        assert_eq!(sent.header_value("authorization"), Some("token gho_abc"));
        assert_eq!(sent.header_value("editor-version"), Some(COPILOT_EDITOR_VERSION));
    }

    #[tokio::test]
    async fn missing_endpoint_is_left_to_caller() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, json!({"token": "t", "expires_at": 1}));
        let issued = CopilotTokenSource::new(transport, URL)
            .acquire("gho")
            .await
            .unwrap();
        assert!(issued.endpoint.is_none());
    }

    #[tokio::test]
    async fn forbidden_mentions_subscription() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(403, json!({"message": "Forbidden"}));
        let err = CopilotTokenSource::new(transport, URL)
            .acquire("gho")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::TokenAcquisition(msg)) if msg.contains("subscription")
        ));
    }
}
