//! Data-plane forwarding to the Copilot API.

pub mod headers;
pub mod policy;

use std::sync::Arc;
use std::time::Instant;

use actix_web::http::header::{HeaderName as OutName, HeaderValue as OutValue};
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse};
use bytes::Bytes;
use futures_util::TryStreamExt;
use relay_auth::{redact_secrets, CredentialStore, TokenCache};
use relay_metrics::{MultiplierTable, UsageTracker};
use reqwest_middleware::ClientWithMiddleware;

use crate::error::{AppError, Result};
use headers::{forwardable_response_header, initiator_for, outbound_headers, SiteAttribution};
use policy::{upstream_path, PathPolicy, VERSION_PREFIX};

/// Accounting key for bodies that name no model.
pub const UNKNOWN_MODEL: &str = "unknown";

pub struct ProxyEngine {
    client: ClientWithMiddleware,
    tokens: TokenCache,
    store: Arc<CredentialStore>,
    usage: Arc<UsageTracker>,
    multipliers: MultiplierTable,
    policy: PathPolicy,
    default_api_base: String,
    site: SiteAttribution,
}

impl ProxyEngine {
    pub fn new(
        client: ClientWithMiddleware,
        tokens: TokenCache,
        store: Arc<CredentialStore>,
        usage: Arc<UsageTracker>,
        default_api_base: impl Into<String>,
    ) -> Self {
        let record = store.snapshot();
        let policy = PathPolicy::new(record.relay.allowed_paths.clone());
        tracing::info!(
            "Data plane admits {}/* and {:?}",
            VERSION_PREFIX,
            policy.prefixes()
        );
        Self {
            client,
            tokens,
            usage,
            multipliers: MultiplierTable::default(),
            policy,
            default_api_base: default_api_base.into().trim_end_matches('/').to_string(),
            site: SiteAttribution {
                url: record.site_url,
                name: record.site_name,
            },
            store,
        }
    }

    /// Forward one admitted call and stream the upstream reply back.
    pub async fn forward(&self, req: &HttpRequest, body: Bytes) -> Result<HttpResponse> {
        let path = req.path();
        if !self.policy.admits(path) {
            tracing::warn!("Rejected data-plane path {}", path);
            return Err(AppError::PathNotAllowed(path.to_string()));
        }
        if !self.store.has_credential() {
            return Err(AppError::NotAuthenticated);
        }

        let parsed: Option<serde_json::Value> = if body.is_empty() {
            None
        } else {
            serde_json::from_slice(&body).ok()
        };
        let weight = if body.is_empty() {
            0.0
        } else {
            let model = parsed
                .as_ref()
                .and_then(|value| value.get("model"))
                .and_then(|model| model.as_str())
                .unwrap_or(UNKNOWN_MODEL);
            self.multipliers.multiplier(model)
        };
        self.usage.record(weight);

        let token = self.tokens.get_token().await?;
        let base = token
            .api_endpoint
            .as_deref()
            .unwrap_or(&self.default_api_base);
        let url = upstream_url(base, path, req.query_string());

        let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
            .map_err(|_| AppError::BadRequest(format!("unsupported method {}", req.method())))?;
        let headers = outbound_headers(
            req.headers(),
            &token.token,
            initiator_for(parsed.as_ref()),
            &self.site,
            !body.is_empty(),
        );

        let started = Instant::now();
        let mut request = self.client.request(method.clone(), &url).headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }
        let upstream = request.send().await.map_err(|e| {
            tracing::warn!(
                "Upstream {} {} failed: {}",
                method,
                path,
                redact_secrets(&e.to_string())
            );
            AppError::UpstreamTransport
        })?;

        let status = upstream.status();
        tracing::info!(
            "Proxied {} {} -> {} (weight {}) in {}ms",
            method,
            path,
            status.as_u16(),
            weight,
            started.elapsed().as_millis()
        );
        if status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::warn!("Upstream rejected the API token, dropping cached token");
            self.tokens.invalidate();
        }

        let mut response = HttpResponse::build(
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
        );
        for (name, value) in upstream.headers() {
            if !forwardable_response_header(name.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                OutName::from_bytes(name.as_str().as_bytes()),
                OutValue::from_bytes(value.as_bytes()),
            ) {
                response.append_header((name, value));
            }
        }

        let log_path = path.to_string();
        let stream = upstream.bytes_stream().map_err(move |e| {
            tracing::warn!(
                "Upstream stream for {} broke off: {}",
                log_path,
                redact_secrets(&e.to_string())
            );
            e
        });
        Ok(response.streaming(stream))
    }
}

/// Join the upstream base with the de-versioned path and the raw query.
pub fn upstream_url(base: &str, path: &str, query: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = upstream_path(path);
    if query.is_empty() {
        format!("{base}{path}")
    } else {
        format!("{base}{path}?{query}")
    }
}
