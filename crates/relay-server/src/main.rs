use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use relay_auth::{redact::mask_secret, CredentialStore, RelayMode};
use relay_server::{logging::init_logging, server, Cli};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let config_path = cli.config_path();
    let store = CredentialStore::load(&config_path)
        .with_context(|| format!("cannot start with config {}", config_path.display()))?;
    let record = store.snapshot();

    if record.relay.mode == RelayMode::Client {
        bail!(
            "{} is a relay client config (relay.mode = \"client\"); refusing to serve from it",
            config_path.display()
        );
    }
    if !record.relay.enabled {
        tracing::warn!("relay.enabled is false in {}, serving anyway", config_path.display());
    }

    let config = cli.server_config(&record);
    tracing::info!(
        "Config {} loaded, credential: {}, bundle source: {}",
        config_path.display(),
        store
            .github_token()
            .map(|token| mask_secret(&token))
            .unwrap_or_else(|| "none".to_string()),
        config.source_dir.display()
    );

    server::run(config, Arc::new(store))
        .await
        .context("relay server failed")?;
    Ok(())
}
