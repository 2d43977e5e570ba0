//! OAuth device-code handshake, paced entirely by the polling client.
//!
//! Flow lifecycle: created -> pending -> success | expired | error.
//! Records live in memory keyed by an opaque flow id; the upstream device code
//! never leaves this module.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::DEFAULT_REQUEST_TIMEOUT;
use crate::credential::CredentialStore;
use crate::error::DeviceFlowError;
use crate::token_cache::TokenCache;
use crate::USER_AGENT;

pub const GITHUB_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
const DEVICE_SCOPE: &str = "read:user";
const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const SLOW_DOWN_STEP_SECS: u64 = 5;
const MAX_FLOW_LIFETIME_SECS: u64 = 60 * 60;

#[derive(Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    interval: Option<u64>,
}

struct PendingFlow {
    device_code: String,
    expires_at: DateTime<Utc>,
    interval: u64,
}

impl fmt::Debug for PendingFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFlow")
            .field("device_code", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("interval", &self.interval)
            .finish()
    }
}

/// What a caller gets back from [`DeviceAuthFlow::initiate`].
#[derive(Debug, Clone, Serialize)]
pub struct DeviceFlowTicket {
    pub flow_id: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not authorized yet. `interval` is the minimum seconds between polls;
    /// `slow_down` is set when upstream asked for a longer one.
    Pending { interval: u64, slow_down: bool },
    Success,
    Expired,
    Error(String),
}

impl PollOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Success => "success",
            Self::Expired => "expired",
            Self::Error(_) => "error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Pending {
                slow_down: false, ..
            } => "Waiting for authorization".to_string(),
            Self::Pending {
                slow_down: true,
                interval,
            } => format!("Polling too fast, wait {interval}s between polls"),
            Self::Success => "GitHub account authorized".to_string(),
            Self::Expired => "Device code expired, start a new flow".to_string(),
            Self::Error(message) => message.clone(),
        }
    }
}

pub struct DeviceAuthFlow {
    client: ClientWithMiddleware,
    login_base_url: String,
    client_id: String,
    store: Arc<CredentialStore>,
    tokens: TokenCache,
    request_timeout: StdDuration,
    flows: Mutex<HashMap<String, PendingFlow>>,
}

impl DeviceAuthFlow {
    pub fn new(
        client: ClientWithMiddleware,
        login_base_url: impl Into<String>,
        store: Arc<CredentialStore>,
        tokens: TokenCache,
    ) -> Self {
        Self {
            client,
            login_base_url: login_base_url.into().trim_end_matches('/').to_string(),
            client_id: GITHUB_CLIENT_ID.to_string(),
            store,
            tokens,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            flows: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_request_timeout(mut self, timeout: StdDuration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Ask upstream for a device code and start tracking a new flow.
    pub async fn initiate(&self) -> Result<DeviceFlowTicket, DeviceFlowError> {
        self.sweep_expired(Utc::now());

        let url = format!("{}/login/device/code", self.login_base_url);
        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .form(&[("client_id", self.client_id.as_str()), ("scope", DEVICE_SCOPE)])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|_| DeviceFlowError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Device code request failed: HTTP {}", status);
            return Err(DeviceFlowError::Upstream {
                status: status.as_u16(),
            });
        }

        let device = response
            .json::<DeviceCodeResponse>()
            .await
            .map_err(|_| DeviceFlowError::MalformedResponse)?;

        let flow_id = Uuid::new_v4().to_string();
        let interval = device
            .interval
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
            .max(1);
        let expires_in = device.expires_in.min(MAX_FLOW_LIFETIME_SECS);
        let flow = PendingFlow {
            device_code: device.device_code,
            expires_at: Utc::now() + Duration::seconds(expires_in as i64),
            interval,
        };
        self.lock_flows().insert(flow_id.clone(), flow);

        tracing::info!(
            "Device flow {} started, expires in {}s",
            flow_id,
            expires_in
        );

        Ok(DeviceFlowTicket {
            flow_id,
            user_code: device.user_code,
            verification_uri: device.verification_uri,
            expires_in,
            interval,
        })
    }

    /// Check a flow once against upstream. Never blocks waiting for the user.
    pub async fn poll(&self, flow_id: &str) -> PollOutcome {
        let now = Utc::now();
        let lookup = {
            let mut flows = self.lock_flows();
            let lookup = flows
                .get(flow_id)
                .map(|flow| (flow.expires_at, flow.device_code.clone(), flow.interval));
            evict_expired(&mut flows, now);
            lookup
        };

        let (device_code, interval) = match lookup {
            None => return PollOutcome::Error("Flow not found or expired".to_string()),
            Some((expires_at, _, _)) if now >= expires_at => {
                tracing::info!("Device flow {} expired", flow_id);
                return PollOutcome::Expired;
            }
            Some((_, device_code, interval)) => (device_code, interval),
        };

        let url = format!("{}/login/oauth/access_token", self.login_base_url);
        let response = match self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("device_code", device_code.as_str()),
                ("grant_type", DEVICE_GRANT_TYPE),
            ])
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(_) => return PollOutcome::Error("Could not reach GitHub, try again".to_string()),
        };

        let status = response.status();
        let body = match response.json::<AccessTokenResponse>().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return PollOutcome::Error(format!("GitHub returned HTTP {}", status.as_u16()))
            }
            Err(_) => return PollOutcome::Error("Unreadable response from GitHub".to_string()),
        };

        if let Some(token) = body.access_token.filter(|t| !t.trim().is_empty()) {
            self.store.set_github_token(token.trim());
            self.tokens.invalidate();
            self.lock_flows().remove(flow_id);
            tracing::info!("Device flow {} authorized, credential stored", flow_id);
            return PollOutcome::Success;
        }

        match body.error.as_deref() {
            Some("authorization_pending") => PollOutcome::Pending {
                interval,
                slow_down: false,
            },
            Some("slow_down") => {
                let interval = body.interval.unwrap_or(interval + SLOW_DOWN_STEP_SECS);
                if let Some(flow) = self.lock_flows().get_mut(flow_id) {
                    flow.interval = interval;
                }
                PollOutcome::Pending {
                    interval,
                    slow_down: true,
                }
            }
            Some("expired_token") => {
                self.lock_flows().remove(flow_id);
                tracing::info!("Device flow {} expired upstream", flow_id);
                PollOutcome::Expired
            }
            Some(error) => {
                tracing::warn!("Device flow {} failed: {}", flow_id, error);
                PollOutcome::Error(
                    body.error_description
                        .unwrap_or_else(|| error.to_string()),
                )
            }
            None => PollOutcome::Error("Unexpected response from GitHub".to_string()),
        }
    }

    pub fn is_tracked(&self, flow_id: &str) -> bool {
        self.lock_flows().contains_key(flow_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock_flows().len()
    }

    fn sweep_expired(&self, now: DateTime<Utc>) {
        evict_expired(&mut self.lock_flows(), now);
    }

    fn lock_flows(&self) -> MutexGuard<'_, HashMap<String, PendingFlow>> {
        self.flows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn evict_expired(flows: &mut HashMap<String, PendingFlow>, now: DateTime<Utc>) {
    let before = flows.len();
    flows.retain(|_, flow| now < flow.expires_at);
    let evicted = before - flows.len();
    if evicted > 0 {
        tracing::debug!("Evicted {} expired device flow(s)", evicted);
    }
}
