//! In-memory [`Transport`] that replays scripted responses and records requests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::StreamExt;

use crate::transport::{HttpRequest, HttpResponse, Transport};

enum Scripted {
    Response {
        status: u16,
        chunks: Vec<Vec<u8>>,
        delay: Duration,
    },
    Error(String),
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: HttpRequest,
    pub at: tokio::time::Instant,
}

#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_json(&self, status: u16, body: serde_json::Value) -> &Self {
        self.push_chunks(status, vec![body.to_string()])
    }

    pub fn push_chunks<C: Into<Vec<u8>>>(&self, status: u16, chunks: Vec<C>) -> &Self {
        self.push_response(status, chunks, Duration::ZERO)
    }

    /// Like [`push_json`](Self::push_json), but the response only arrives
    /// `delay` after the request was sent.
    pub fn push_json_after(&self, delay: Duration, status: u16, body: serde_json::Value) -> &Self {
        self.push_response(status, vec![body.to_string()], delay)
    }

    fn push_response<C: Into<Vec<u8>>>(&self, status: u16, chunks: Vec<C>, delay: Duration) -> &Self {
        self.responses.lock().unwrap().push_back(Scripted::Response {
            status,
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay,
        });
        self
    }

    pub fn push_error(&self, message: &str) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Scripted::Error(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.request.url == url)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(RecordedRequest {
            request,
            at: tokio::time::Instant::now(),
        });

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Response { status, chunks, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let body = futures::stream::iter(chunks.into_iter().map(Ok)).boxed();
                Ok(HttpResponse::new(status, body))
            }
            Some(Scripted::Error(message)) => anyhow::bail!(message),
            None => anyhow::bail!("no scripted response left for {url}"),
        }
    }
}
