use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::ServiceError;

/// A bearer token as returned by the token endpoint
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_in: Duration,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Expiry-aware holder for the ledger access token.
///
/// Callers share the lock while a refresh is in flight, so concurrent
/// requests trigger at most one fetch.
#[derive(Debug)]
pub struct TokenCache {
    refresh_margin: Duration,
    state: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(refresh_margin: Duration) -> Self {
        Self {
            refresh_margin,
            state: Mutex::new(None),
        }
    }

    /// Returns the cached token, or fetches a new one when it is missing or
    /// within the refresh margin of its expiry.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<String, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, ServiceError>>,
    {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let token = fetch().await?;
        // Short-lived tokens would otherwise never be reusable
        let margin = self.refresh_margin.min(token.expires_in / 2);
        let refresh_at = Instant::now() + token.expires_in.saturating_sub(margin);
        debug!(
            expires_in_secs = token.expires_in.as_secs(),
            "Ledger access token refreshed"
        );

        *state = Some(CachedToken {
            value: token.value.clone(),
            refresh_at,
        });
        Ok(token.value)
    }

    /// Drops the cached token, forcing the next call to fetch
    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
    }
}
