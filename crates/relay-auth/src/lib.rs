//! GitHub Copilot credential handling for the relay.
//!
//! Device Code Flow:
//! 1. Get device code from github.com/login/device/code
//! 2. User authorizes at github.com/login/device
//! 3. A client polls the relay, which polls for the access token
//! 4. The access token is persisted and exchanged for a short-lived API token
//! 5. The API token is cached until shortly before it expires

pub mod client;
pub mod credential;
pub mod device_flow;
pub mod error;
pub mod redact;
pub mod token_cache;

/// Sent on every call the relay itself makes to GitHub.
pub const USER_AGENT: &str = "GitHubCopilotChat/0.26.7";

pub use client::build_upstream_client;
pub use credential::{CredentialRecord, CredentialStore, RelayMode, RelaySettings};
pub use device_flow::{DeviceAuthFlow, DeviceFlowTicket, PollOutcome};
pub use error::{ConfigError, DeviceFlowError, TokenError};
pub use redact::redact_secrets;
pub use token_cache::{ApiToken, TokenCache};
