use std::path::PathBuf;

use thiserror::Error;

/// Failures loading or persisting the credential file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of an API token lookup that did not yield a token.
///
/// Cloneable so the result of one in-flight refresh can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("stored GitHub credential was rejected by upstream")]
    InvalidCredential,

    #[error("API token refresh failed with HTTP {status}")]
    RefreshFailed { status: u16 },

    #[error("API token refresh failed: upstream unreachable")]
    Transport,

    #[error("API token refresh returned an unreadable response")]
    MalformedResponse,
}

#[derive(Debug, Error)]
pub enum DeviceFlowError {
    #[error("device flow request failed: upstream unreachable")]
    Transport,

    #[error("device flow request failed with HTTP {status}")]
    Upstream { status: u16 },

    #[error("device flow returned an unreadable response")]
    MalformedResponse,
}
