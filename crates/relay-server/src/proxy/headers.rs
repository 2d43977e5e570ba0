//! Header rewriting between the caller and the Copilot API.

use actix_web::http::header::HeaderMap as InboundHeaders;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

/// Identification headers the Copilot API expects from an editor client.
const COPILOT_HEADERS: &[(&str, &str)] = &[
    ("editor-version", "vscode/1.99.2"),
    ("editor-plugin-version", "copilot-chat/0.26.7"),
    ("copilot-integration-id", "vscode-chat"),
    ("openai-intent", "conversation-panel"),
    ("user-agent", relay_auth::USER_AGENT),
];

/// Never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Caller headers dropped on the way upstream in addition to hop-by-hop ones.
const STRIPPED_REQUEST: &[&str] = &[
    "authorization",
    "cookie",
    "accept-encoding",
    "x-api-key",
    "x-trace-id",
    "origin",
    "referer",
];

/// Who started the conversation turn, as reported in `X-Initiator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    User,
    Agent,
}

impl Initiator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Initiator::User => "user",
            Initiator::Agent => "agent",
        }
    }
}

/// Attribution forwarded as `HTTP-Referer` / `X-Title`.
#[derive(Debug, Clone, Default)]
pub struct SiteAttribution {
    pub url: Option<String>,
    pub name: Option<String>,
}

/// Build the upstream header set for one proxied call.
pub fn outbound_headers(
    inbound: &InboundHeaders,
    api_token: &str,
    initiator: Initiator,
    site: &SiteAttribution,
    has_body: bool,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in inbound.iter() {
        let lowered = name.as_str();
        if HOP_BY_HOP.contains(&lowered) || STRIPPED_REQUEST.contains(&lowered) {
            continue;
        }
        match (
            HeaderName::from_bytes(lowered.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::debug!("Dropping unconvertible header {}", lowered),
        }
    }

    for (name, value) in COPILOT_HEADERS {
        headers.insert(*name, HeaderValue::from_static(*value));
    }
    headers.insert("x-initiator", HeaderValue::from_static(initiator.as_str()));
    if let Ok(mut bearer) = HeaderValue::from_str(&format!("Bearer {api_token}")) {
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
    }
    if has_body && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    if let Some(url) = site.url.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert("http-referer", url);
    }
    if let Some(name) = site.name.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert("x-title", name);
    }

    headers
}

/// Whether an upstream response header may be passed to the caller.
pub fn forwardable_response_header(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    !(HOP_BY_HOP.contains(&lowered.as_str())
        || lowered == "set-cookie"
        || lowered == "set-cookie2"
        || lowered.starts_with("access-control-"))
}

/// `agent` when the conversation already holds assistant or tool turns.
pub fn initiator_for(body: Option<&serde_json::Value>) -> Initiator {
    let is_agent = body
        .and_then(|value| value.get("messages"))
        .and_then(|messages| messages.as_array())
        .map(|messages| {
            messages.iter().any(|message| {
                matches!(
                    message.get("role").and_then(|role| role.as_str()),
                    Some("assistant") | Some("tool")
                )
            })
        })
        .unwrap_or(false);

    if is_agent {
        Initiator::Agent
    } else {
        Initiator::User
    }
}
