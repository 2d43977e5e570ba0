use std::sync::Arc;
use std::time::Instant;

use relay_auth::{build_upstream_client, CredentialStore, DeviceAuthFlow, TokenCache};
use relay_metrics::UsageTracker;

use crate::bundle::BundleStreamer;
use crate::config::ServerConfig;
use crate::proxy::ProxyEngine;

/// Everything the handlers share, built once at startup.
pub struct AppState {
    pub store: Arc<CredentialStore>,
    pub tokens: TokenCache,
    pub device_flow: DeviceAuthFlow,
    pub usage: Arc<UsageTracker>,
    pub proxy: ProxyEngine,
    pub bundle: BundleStreamer,
    pub port: u16,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: &ServerConfig, store: Arc<CredentialStore>) -> Self {
        let client = build_upstream_client();
        let tokens = TokenCache::new(client.clone(), &config.github_api_url, Arc::clone(&store))
            .with_request_timeout(config.upstream_timeout);
        let device_flow = DeviceAuthFlow::new(
            client.clone(),
            &config.github_base_url,
            Arc::clone(&store),
            tokens.clone(),
        )
        .with_request_timeout(config.upstream_timeout);
        let usage = Arc::new(UsageTracker::new());
        let proxy = ProxyEngine::new(
            client,
            tokens.clone(),
            Arc::clone(&store),
            Arc::clone(&usage),
            &config.copilot_api_url,
        );
        let bundle = BundleStreamer::new(&config.source_dir, store.file_name());

        Self {
            store,
            tokens,
            device_flow,
            usage,
            proxy,
            bundle,
            port: config.port,
            started_at: Instant::now(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.has_credential()
    }
}
