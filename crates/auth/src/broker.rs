//! Short-lived service token cache.
//!
//! The broker exchanges a long-lived credential for a bearer token through a
//! [`TokenSource`] and caches it. State moves `Empty -> Valid -> Invalidated ->
//! Valid`; callers invalidate after a 401/403 and re-acquire once.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Seconds before `expires_at` at which a cached token is treated as stale.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: String,
    pub expires_at: Option<i64>,
    pub endpoint: Option<String>,
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire(&self, credential: &str) -> Result<IssuedToken>;
}

/// Uses the credential itself as the bearer token.
pub struct PassthroughTokenSource;

#[async_trait]
impl TokenSource for PassthroughTokenSource {
    async fn acquire(&self, credential: &str) -> Result<IssuedToken> {
        Ok(IssuedToken {
            value: credential.to_string(),
            expires_at: None,
            endpoint: None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: Option<i64>,
    pub endpoint: Option<String>,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .map_or(true, |exp| now < exp - EXPIRY_MARGIN_SECS)
    }
}

#[derive(Debug, Clone, Default)]
enum TokenState {
    #[default]
    Empty,
    Valid(CachedToken),
    Invalidated,
}

pub struct TokenBroker {
    source: Arc<dyn TokenSource>,
    state: Mutex<TokenState>,
}

impl TokenBroker {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            state: Mutex::new(TokenState::Empty),
        }
    }

    /// Returns the cached token, acquiring a new one when the cache is empty,
    /// invalidated, or about to expire. The lock is held across acquisition so
    /// concurrent callers share a single exchange.
    pub async fn ensure_token(&self, credential: &str) -> Result<CachedToken> {
        let mut state = self.state.lock().await;

        match &*state {
            TokenState::Valid(cached) if cached.is_fresh(Utc::now().timestamp()) => {
                return Ok(cached.clone());
            }
            TokenState::Valid(_) => tracing::info!("Service token expired, exchanging for new one"),
            TokenState::Invalidated => tracing::info!("Service token rejected, re-acquiring"),
            TokenState::Empty => tracing::debug!("Acquiring service token"),
        }

        let issued = self.source.acquire(credential).await?;
        let cached = CachedToken {
            value: issued.value,
            acquired_at: Utc::now(),
            expires_at: issued.expires_at,
            endpoint: issued.endpoint,
        };
        *state = TokenState::Valid(cached.clone());
        Ok(cached)
    }

    /// Marks the current token as rejected. Returns `false` when there was no
    /// valid token to invalidate.
    pub async fn invalidate(&self) -> bool {
        let mut state = self.state.lock().await;
        if matches!(*state, TokenState::Valid(_)) {
            *state = TokenState::Invalidated;
            true
        } else {
            false
        }
    }

    /// Drops any cached token (sign-out).
    pub async fn clear(&self) {
        *self.state.lock().await = TokenState::Empty;
    }

    pub async fn is_valid(&self) -> bool {
        matches!(*self.state.lock().await, TokenState::Valid(_))
    }

    pub async fn endpoint(&self) -> Option<String> {
        match &*self.state.lock().await {
            TokenState::Valid(cached) => cached.endpoint.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        expires_at: Option<i64>,
    }

    impl CountingSource {
        fn new(expires_at: Option<i64>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                expires_at,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn acquire(&self, credential: &str) -> Result<IssuedToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;
            Ok(IssuedToken {
                value: format!("{credential}-svc-{n}"),
                expires_at: self.expires_at,
                endpoint: Some("https://api.test".into()),
            })
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TokenSource for FailingSource {
        async fn acquire(&self, _credential: &str) -> Result<IssuedToken> {
            Err(crate::AuthError::TokenAcquisition("401: bad credentials".into()).into())
        }
    }

    #[tokio::test]
    async fn cold_then_warm() {
        let source = CountingSource::new(None);
        let broker = TokenBroker::new(source.clone());

        let first = broker.ensure_token("gho").await.unwrap();
        assert_eq!(source.calls(), 1);
        assert_eq!(first.value, "gho-svc-1");

        let second = broker.ensure_token("gho").await.unwrap();
        assert_eq!(source.calls(), 1);
        assert_eq!(second.value, "gho-svc-1");
        assert_eq!(broker.endpoint().await.as_deref(), Some("https://api.test"));
    }

    #[tokio::test]
    async fn invalidate_causes_exactly_one_reacquire() {
        let source = CountingSource::new(None);
        let broker = TokenBroker::new(source.clone());

        broker.ensure_token("gho").await.unwrap();
        assert!(broker.invalidate().await);
        assert!(!broker.invalidate().await);
        assert!(!broker.is_valid().await);

        let token = broker.ensure_token("gho").await.unwrap();
        assert_eq!(token.value, "gho-svc-2");
        broker.ensure_token("gho").await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn near_expiry_is_refreshed() {
        let soon = Utc::now().timestamp() + 30;
        let source = CountingSource::new(Some(soon));
        let broker = TokenBroker::new(source.clone());

        broker.ensure_token("gho").await.unwrap();
        broker.ensure_token("gho").await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_acquisition() {
        let source = CountingSource::new(None);
        let broker = Arc::new(TokenBroker::new(source.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let broker = broker.clone();
                tokio::spawn(async move { broker.ensure_token("gho").await.unwrap().value })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap(), "gho-svc-1");
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn failure_leaves_cache_empty() {
        let broker = TokenBroker::new(Arc::new(FailingSource));
        let err = broker.ensure_token("gho").await.unwrap_err();
        assert!(err.to_string().contains("bad credentials"));
        assert!(!broker.is_valid().await);
    }

    #[tokio::test]
    async fn clear_forgets_token() {
        let source = CountingSource::new(None);
        let broker = TokenBroker::new(source.clone());
        broker.ensure_token("gho").await.unwrap();
        broker.clear().await;
        assert!(!broker.invalidate().await);
        broker.ensure_token("gho").await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn passthrough_uses_credential() {
        let broker = TokenBroker::new(Arc::new(PassthroughTokenSource));
        assert_eq!(broker.ensure_token("sk-1").await.unwrap().value, "sk-1");
    }
}
