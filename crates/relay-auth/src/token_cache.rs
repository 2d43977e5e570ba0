//! Short-lived Copilot API token, exchanged from the stored GitHub credential.
//!
//! Refreshes are single-flight: the first caller to find the cache stale
//! starts the exchange and every concurrent caller awaits that same future.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

use crate::client::DEFAULT_REQUEST_TIMEOUT;
use crate::credential::CredentialStore;
use crate::error::TokenError;
use crate::USER_AGENT;

/// Subtracted from the upstream expiry so a token is never used at its edge.
pub const REFRESH_BUFFER_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiToken {
    pub token: String,
    /// Upstream expiry minus [`REFRESH_BUFFER_SECS`].
    pub expires_at: DateTime<Utc>,
    /// API base announced by the exchange response, if any.
    pub api_endpoint: Option<String>,
}

impl ApiToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    token: String,
    expires_at: i64,
    #[serde(default)]
    endpoints: Option<Endpoints>,
}

#[derive(Debug, Deserialize)]
struct Endpoints {
    api: Option<String>,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<ApiToken, TokenError>>>;

#[derive(Default)]
struct CacheState {
    token: Option<ApiToken>,
    inflight: Option<RefreshFuture>,
    /// Bumped by `invalidate`; a refresh started under an older generation
    /// must not install its result.
    generation: u64,
}

struct Inner {
    client: ClientWithMiddleware,
    api_base_url: String,
    store: Arc<CredentialStore>,
    state: Mutex<CacheState>,
}

#[derive(Clone)]
pub struct TokenCache {
    inner: Arc<Inner>,
    request_timeout: std::time::Duration,
}

impl TokenCache {
    pub fn new(
        client: ClientWithMiddleware,
        api_base_url: impl Into<String>,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
                store,
                state: Mutex::new(CacheState::default()),
            }),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound each token exchange. A timed-out exchange fails as `Transport`
    /// and the next caller starts a new one.
    pub fn with_request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Return a valid API token, refreshing it if the cached one is stale.
    pub async fn get_token(&self) -> Result<ApiToken, TokenError> {
        if !self.inner.store.has_credential() {
            return Err(TokenError::NotAuthenticated);
        }

        let refresh = {
            let mut state = self.inner.lock_state();
            if let Some(token) = state.token.as_ref().filter(|t| t.is_fresh(Utc::now())) {
                return Ok(token.clone());
            }
            if let Some(inflight) = state.inflight.clone() {
                inflight
            } else {
                tracing::debug!("API token stale or absent, refreshing");
                let refresh = Inner::refresh(
                    Arc::clone(&self.inner),
                    state.generation,
                    self.request_timeout,
                )
                    .boxed()
                    .shared();
                state.inflight = Some(refresh.clone());
                refresh
            }
        };

        refresh.await
    }

    /// Drop the cached token so the next caller refreshes.
    pub fn invalidate(&self) {
        let mut state = self.inner.lock_state();
        state.token = None;
        state.inflight = None;
        state.generation += 1;
    }

    /// The cached token, if one is held and still fresh. Never refreshes.
    pub fn cached(&self) -> Option<ApiToken> {
        self.inner
            .lock_state()
            .token
            .clone()
            .filter(|token| token.is_fresh(Utc::now()))
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn refresh(
        self: Arc<Self>,
        generation: u64,
        timeout: std::time::Duration,
    ) -> Result<ApiToken, TokenError> {
        let result = self.exchange(timeout).await;

        let mut state = self.lock_state();
        if state.generation == generation {
            state.inflight = None;
            if let Ok(token) = &result {
                state.token = Some(token.clone());
            }
        }
        result
    }

    async fn exchange(&self, timeout: std::time::Duration) -> Result<ApiToken, TokenError> {
        let github_token = self
            .store
            .github_token()
            .ok_or(TokenError::NotAuthenticated)?;
        let url = format!("{}/copilot_internal/v2/token", self.api_base_url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("token {}", github_token))
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(
                    "API token exchange did not complete: {}",
                    if e.is_timeout() { "timed out" } else { "transport error" }
                );
                TokenError::Transport
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("GitHub credential rejected by token exchange, clearing it");
            self.store.clear_github_token_if(&github_token);
            return Err(TokenError::InvalidCredential);
        }
        if !status.is_success() {
            tracing::warn!("API token exchange failed: HTTP {}", status);
            return Err(TokenError::RefreshFailed {
                status: status.as_u16(),
            });
        }

        let body = response
            .json::<TokenExchangeResponse>()
            .await
            .map_err(|_| TokenError::MalformedResponse)?;
        let upstream_expiry =
            DateTime::from_timestamp(body.expires_at, 0).ok_or(TokenError::MalformedResponse)?;

        let token = ApiToken {
            token: body.token,
            expires_at: upstream_expiry - Duration::seconds(REFRESH_BUFFER_SECS),
            api_endpoint: body
                .endpoints
                .and_then(|endpoints| endpoints.api)
                .map(|api| api.trim_end_matches('/').to_string()),
        };
        tracing::info!(
            "API token refreshed, usable until {}",
            token.expires_at.to_rfc3339()
        );
        Ok(token)
    }
}
