use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use relay_auth::CredentialRecord;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_GITHUB_BASE_URL: &str = "https://github.com";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_COPILOT_API_URL: &str = "https://api.githubcopilot.com";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Copilot relay server
#[derive(Parser, Debug, Clone)]
#[command(name = "copilot-relay")]
#[command(about = "Share one GitHub Copilot subscription over an OpenAI-compatible HTTP API", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Credential/config file path
    #[arg(long, env = "COPILOT_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "RELAY_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on (defaults to relay.port from the config file)
    #[arg(short, long, env = "RELAY_PORT")]
    pub port: Option<u16>,

    /// Log filter, e.g. "info" or "relay_server=debug"
    #[arg(long, env = "RUST_LOG")]
    pub log_level: Option<String>,

    /// Source tree served by /bundle.tar.gz (defaults to the working directory)
    #[arg(long, env = "RELAY_SOURCE_DIR")]
    pub source_dir: Option<PathBuf>,

    #[arg(long, env = "GITHUB_BASE_URL", default_value = DEFAULT_GITHUB_BASE_URL)]
    pub github_base_url: String,

    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_GITHUB_API_URL)]
    pub github_api_url: String,

    #[arg(long, env = "COPILOT_API_URL", default_value = DEFAULT_COPILOT_API_URL)]
    pub copilot_api_url: String,

    /// Seconds allowed for each device-flow or token-exchange call to GitHub
    #[arg(long, env = "RELAY_UPSTREAM_TIMEOUT", default_value_t = DEFAULT_UPSTREAM_TIMEOUT_SECS)]
    pub upstream_timeout: u64,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_path)
    }

    /// Merge CLI/env values with the persisted record.
    pub fn server_config(&self, record: &CredentialRecord) -> ServerConfig {
        let source_dir = self
            .source_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        ServerConfig {
            host: self.host.clone(),
            port: self.port.unwrap_or(record.relay.port),
            source_dir,
            github_base_url: self.github_base_url.clone(),
            github_api_url: self.github_api_url.clone(),
            copilot_api_url: self.copilot_api_url.clone(),
            upstream_timeout: Duration::from_secs(self.upstream_timeout.max(1)),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("copilot-relay")
        .join("config.json")
}

/// Runtime settings for one server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub source_dir: PathBuf,
    pub github_base_url: String,
    pub github_api_url: String,
    pub copilot_api_url: String,
    pub upstream_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: relay_auth::credential::DEFAULT_RELAY_PORT,
            source_dir: PathBuf::from("."),
            github_base_url: DEFAULT_GITHUB_BASE_URL.to_string(),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            copilot_api_url: DEFAULT_COPILOT_API_URL.to_string(),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_falls_back_to_record() {
        let cli = Cli::parse_from(["copilot-relay", "--source-dir", "/srv/relay"]);
        let mut record = CredentialRecord::default();
        record.relay.port = 9191;

        let config = cli.server_config(&record);
        assert_eq!(config.port, 9191);
        assert_eq!(config.source_dir, PathBuf::from("/srv/relay"));
        assert_eq!(config.copilot_api_url, DEFAULT_COPILOT_API_URL);
        assert_eq!(
            config.upstream_timeout,
            Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS)
        );
    }

    #[test]
    fn upstream_timeout_is_configurable_but_never_zero() {
        let cli = Cli::parse_from(["copilot-relay", "--upstream-timeout", "5"]);
        let config = cli.server_config(&CredentialRecord::default());
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));

        let cli = Cli::parse_from(["copilot-relay", "--upstream-timeout", "0"]);
        let config = cli.server_config(&CredentialRecord::default());
        assert_eq!(config.upstream_timeout, Duration::from_secs(1));
    }

    #[test]
    fn explicit_port_wins() {
        let cli = Cli::parse_from(["copilot-relay", "--port", "3000", "--host", "0.0.0.0"]);
        let config = cli.server_config(&CredentialRecord::default());
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn default_config_path_is_namespaced() {
        let path = default_config_path();
        assert!(path.ends_with("copilot-relay/config.json"));
    }
}
