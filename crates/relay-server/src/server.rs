use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::DefaultHeaders, web, App, HttpServer};
use relay_auth::CredentialStore;

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::handlers::{auth, health, proxy, setup};
use crate::middleware::TracingMiddleware;
use crate::state::AppState;

/// Largest data-plane body accepted.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

pub fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
        .app_data(web::JsonConfig::default().error_handler(|err, _req| {
            AppError::BadRequest(err.to_string()).into()
        }))
        .route("/", web::get().to(health::health))
        .route("/health", web::get().to(health::health))
        .route("/stats", web::get().to(health::stats))
        .route("/auth/status", web::get().to(auth::status))
        .route("/auth/device", web::post().to(auth::start_device_flow))
        .route("/auth/device", web::get().to(auth::device_page))
        .route("/auth/poll", web::post().to(auth::poll))
        .route("/auth/logout", web::post().to(auth::logout))
        .route("/setup", web::get().to(setup::setup_script))
        .route("/bundle.tar.gz", web::get().to(setup::bundle))
        // Everything else is a data-plane candidate; admission happens in the proxy.
        .route("/{tail:.*}", web::route().to(proxy::forward));
}

pub fn cors() -> Cors {
    Cors::permissive()
}

/// Covers responses to callers that send no `Origin`.
pub fn default_headers() -> DefaultHeaders {
    DefaultHeaders::new().add(("Access-Control-Allow-Origin", "*"))
}

pub async fn run(config: ServerConfig, store: Arc<CredentialStore>) -> std::io::Result<()> {
    let app_state = web::Data::new(AppState::new(&config, store));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(TracingMiddleware)
            .wrap(default_headers())
            .wrap(cors())
            .configure(app_config)
    })
    .bind((config.host.as_str(), config.port))?
    .run();

    tracing::info!(
        "copilot-relay listening on http://{}:{}",
        config.host,
        config.port
    );

    if let Err(e) = server.await {
        tracing::error!("Relay server error: {}", e);
        return Err(e);
    }
    tracing::info!("Relay server stopped");
    Ok(())
}
