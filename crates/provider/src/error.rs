fn extract_error_message(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = v["error"]["message"].as_str() {
            return msg.to_string();
        }
        if let Some(msg) = v["message"].as_str() {
            return msg.to_string();
        }
        if let Some(msg) = v["error"].as_str() {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Non-2xx from the chat endpoint, after the single re-authentication retry.
    #[error("chat request failed ({status}): {}", extract_error_message(body))]
    ChatRequest { status: u16, body: String },

    #[error("chat stream error: {0}")]
    Stream(String),
}

impl ProviderError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ChatRequest { status, .. } => Some(*status),
            Self::Stream(_) => None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}
