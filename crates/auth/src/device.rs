//! OAuth 2.0 Device Authorization Grant (RFC 8628) client.
//!
//! `start` requests a device and user code; `poll` then asks the token
//! endpoint for an access token every `interval`, backing off on `slow_down`,
//! until the user approves, denies, or the code expires. Polling can be
//! cancelled from another task with [`DeviceAuthClient::cancel`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::transport::{HttpRequest, Transport};
use crate::AuthError;

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_EXPIRES_IN_SECS: u64 = 900;
const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DeviceEndpoints {
    pub client_id: String,
    pub scope: String,
    pub device_code_url: String,
    pub access_token_url: String,
    pub slow_down_step: Duration,
    pub default_interval: Duration,
    pub extra_headers: Vec<(String, String)>,
}

impl DeviceEndpoints {
    pub fn from_settings(settings: &searchdesk_config::AuthSettings) -> Self {
        Self {
            client_id: settings.client_id.clone(),
            scope: settings.scope.clone(),
            device_code_url: settings.device_code_url.clone(),
            access_token_url: settings.access_token_url.clone(),
            slow_down_step: Duration::from_secs(settings.slow_down_step_secs),
            default_interval: Duration::from_secs(settings.default_interval_secs),
            extra_headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.extra_headers = headers;
        self
    }
}

/// What the user needs to approve the sign-in, plus the polling parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: Duration,
    pub interval: Duration,
    /// When the device code was issued; `expires_in` counts from here.
    pub issued_at: Instant,
}

impl DeviceAuthSession {
    pub fn deadline(&self) -> Instant {
        self.issued_at + self.expires_in
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAuthState {
    Idle,
    Requested,
    Polling,
    Succeeded,
    Denied,
    Expired,
    Cancelled,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    #[serde(alias = "verification_url")]
    verification_uri: String,
    expires_in: Option<u64>,
    interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenPollResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub struct DeviceAuthClient {
    transport: Arc<dyn Transport>,
    endpoints: DeviceEndpoints,
    state: watch::Sender<DeviceAuthState>,
    cancel: Mutex<CancellationToken>,
}

impl DeviceAuthClient {
    pub fn new(transport: Arc<dyn Transport>, endpoints: DeviceEndpoints) -> Self {
        let (state, _) = watch::channel(DeviceAuthState::Idle);
        Self {
            transport,
            endpoints,
            state,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn state(&self) -> DeviceAuthState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceAuthState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: DeviceAuthState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, ?state, "Device authorization state changed");
        }
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops an in-flight `poll`. A pending sleep or token request is
    /// abandoned, and a response that arrives afterwards is discarded.
    pub fn cancel(&self) {
        self.cancel_token().cancel();
    }

    fn cancelled(&self) -> anyhow::Error {
        self.set_state(DeviceAuthState::Cancelled);
        AuthError::Cancelled.into()
    }

    fn request(&self, url: &str) -> HttpRequest {
        let mut req = HttpRequest::post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        for (k, v) in &self.endpoints.extra_headers {
            req = req.header(k.clone(), v.clone());
        }
        req
    }

    pub async fn start(&self) -> Result<DeviceAuthSession> {
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        self.set_state(DeviceAuthState::Requested);

        let req = self.request(&self.endpoints.device_code_url).json(json!({
            "client_id": self.endpoints.client_id,
            "scope": self.endpoints.scope,
        }));

        let resp = match self.transport.send(req).await {
            Ok(resp) => resp,
            Err(e) => {
                self.set_state(DeviceAuthState::Idle);
                return Err(AuthError::Start(e.to_string()).into());
            }
        };

        if !resp.is_success() {
            let status = resp.status;
            let body = resp.text().await.unwrap_or_default();
            self.set_state(DeviceAuthState::Idle);
            return Err(AuthError::Start(format!("{status}: {}", body.trim())).into());
        }

        let data: DeviceCodeResponse = match resp.json().await {
            Ok(data) => data,
            Err(e) => {
                self.set_state(DeviceAuthState::Idle);
                return Err(AuthError::Start(format!("unreadable device code response: {e}")).into());
            }
        };

        let issued_at = Instant::now();
        let interval = data
            .interval
            .map(Duration::from_secs)
            .unwrap_or(self.endpoints.default_interval)
            .max(MIN_INTERVAL);

        let session = DeviceAuthSession {
            device_code: data.device_code,
            user_code: data.user_code,
            verification_uri: data.verification_uri,
            expires_in: Duration::from_secs(data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
            interval,
            issued_at,
        };

        tracing::info!(
            user_code = %session.user_code,
            expires_in = session.expires_in.as_secs(),
            "Device authorization started"
        );
        self.set_state(DeviceAuthState::Polling);
        Ok(session)
    }

    /// Polls until the user approves (returning the access token), denies, or
    /// the device code expires.
    pub async fn poll(&self, session: &DeviceAuthSession) -> Result<String> {
        let cancel = self.cancel_token();
        self.set_state(DeviceAuthState::Polling);

        let deadline = session.deadline();
        let mut interval = session.interval;

        while Instant::now() < deadline {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                _ = tokio::time::sleep(interval) => {}
            }

            let req = self.request(&self.endpoints.access_token_url).json(json!({
                "client_id": self.endpoints.client_id,
                "device_code": session.device_code,
                "grant_type": DEVICE_GRANT_TYPE,
            }));

            let exchange = async {
                let resp = self.transport.send(req).await?;
                let status = resp.status;
                let body = resp.text().await.unwrap_or_default();
                Ok::<_, anyhow::Error>((status, body))
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                outcome = exchange => outcome,
            };
            if cancel.is_cancelled() {
                return Err(self.cancelled());
            }

            let (status, body) = match outcome {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(error = %e, "Token poll request failed, retrying");
                    continue;
                }
            };

            let data: TokenPollResponse = match serde_json::from_str(&body) {
                Ok(data) => data,
                Err(_) => {
                    tracing::warn!(status, "Unreadable token poll response, retrying");
                    continue;
                }
            };

            if let Some(token) = data.access_token.filter(|t| !t.is_empty()) {
                tracing::info!("Device authorization approved");
                self.set_state(DeviceAuthState::Succeeded);
                return Ok(token);
            }

            match data.error.as_deref() {
                Some("authorization_pending") => {}
                Some("slow_down") => {
                    interval += self.endpoints.slow_down_step;
                    tracing::debug!(interval_secs = interval.as_secs(), "Token endpoint asked to slow down");
                }
                Some("expired_token") => {
                    self.set_state(DeviceAuthState::Expired);
                    return Err(AuthError::Expired.into());
                }
                Some(other) => {
                    self.set_state(DeviceAuthState::Denied);
                    let description = data
                        .error_description
                        .filter(|d| !d.is_empty())
                        .unwrap_or_else(|| other.to_string());
                    return Err(AuthError::Denied(description).into());
                }
                None => {
                    tracing::warn!(status, "Token poll response had neither token nor error");
                }
            }
        }

        self.set_state(DeviceAuthState::Expired);
        Err(AuthError::Expired.into())
    }
}
