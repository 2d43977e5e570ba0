use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::{AppError, Result};
use crate::setup::{relay_base_url, render_setup_script};
use crate::state::AppState;

pub async fn setup_script(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let conn = req.connection_info();
    let base = relay_base_url(conn.scheme(), conn.host()).unwrap_or_else(|| {
        tracing::warn!("Unusable Host header for /setup, falling back to localhost");
        format!("http://127.0.0.1:{}", state.port)
    });

    HttpResponse::Ok()
        .content_type("text/x-shellscript")
        .body(render_setup_script(&base, state.port))
}

pub async fn bundle(state: web::Data<AppState>) -> Result<HttpResponse> {
    state.bundle.refresh_source().await;

    let stream = state.bundle.stream().await.map_err(|e| {
        tracing::error!("Bundle generation failed: {}", e);
        AppError::BundleGeneration
    })?;

    Ok(HttpResponse::Ok()
        .content_type("application/gzip")
        .insert_header((
            "Content-Disposition",
            "attachment; filename=\"bundle.tar.gz\"",
        ))
        .streaming(stream))
}
