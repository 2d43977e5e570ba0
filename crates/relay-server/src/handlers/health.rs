use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    authenticated: bool,
    requests: u64,
    premium_requests_used: f64,
}

#[derive(Serialize)]
struct StatsResponse {
    requests: u64,
    premium_requests_used: f64,
    authenticated: bool,
    /// Whole seconds since startup.
    uptime: u64,
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let usage = state.usage.snapshot();
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        authenticated: state.is_authenticated(),
        requests: usage.requests,
        premium_requests_used: usage.premium_requests_used,
    })
}

pub async fn stats(state: web::Data<AppState>) -> HttpResponse {
    let usage = state.usage.snapshot();
    HttpResponse::Ok().json(StatsResponse {
        requests: usage.requests,
        premium_requests_used: usage.premium_requests_used,
        authenticated: state.is_authenticated(),
        uptime: state.started_at.elapsed().as_secs(),
    })
}
