use actix_web::{http::StatusCode, web, HttpResponse};
use chrono::Utc;
use relay_auth::PollOutcome;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

const DEVICE_PAGE: &str = include_str!("../../assets/device_auth.html");

#[derive(Serialize)]
struct AuthStatusResponse {
    authenticated: bool,
    message: String,
}

#[derive(Serialize)]
struct DeviceStartResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verification_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<u64>,
    message: String,
}

#[derive(Deserialize)]
pub struct PollRequest {
    pub flow_id: String,
}

#[derive(Serialize)]
struct PollResponse {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<u64>,
}

#[derive(Serialize)]
struct LogoutResponse {
    success: bool,
    message: String,
}

pub async fn status(state: web::Data<AppState>) -> HttpResponse {
    let response = if let Some(token) = state.tokens.cached() {
        AuthStatusResponse {
            authenticated: true,
            message: format!(
                "Authenticated; API token valid for another {} minutes",
                (token.expires_at - Utc::now()).num_minutes().max(0)
            ),
        }
    } else if state.is_authenticated() {
        AuthStatusResponse {
            authenticated: true,
            message: "Authenticated".to_string(),
        }
    } else {
        AuthStatusResponse {
            authenticated: false,
            message: "Not authenticated. POST /auth/device or open /auth/device in a browser."
                .to_string(),
        }
    };
    HttpResponse::Ok().json(response)
}

pub async fn start_device_flow(state: web::Data<AppState>) -> HttpResponse {
    match state.device_flow.initiate().await {
        Ok(ticket) => HttpResponse::Ok().json(DeviceStartResponse {
            success: true,
            message: format!(
                "Open {} and enter code {}",
                ticket.verification_uri, ticket.user_code
            ),
            user_code: Some(ticket.user_code),
            verification_uri: Some(ticket.verification_uri),
            flow_id: Some(ticket.flow_id),
            expires_in: Some(ticket.expires_in),
            interval: Some(ticket.interval),
        }),
        Err(e) => {
            tracing::error!("Failed to start device flow: {}", e);
            HttpResponse::build(StatusCode::BAD_GATEWAY).json(DeviceStartResponse {
                success: false,
                user_code: None,
                verification_uri: None,
                flow_id: None,
                expires_in: None,
                interval: None,
                message: e.to_string(),
            })
        }
    }
}

pub async fn device_page() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(DEVICE_PAGE)
}

pub async fn poll(state: web::Data<AppState>, body: web::Json<PollRequest>) -> HttpResponse {
    let outcome = state.device_flow.poll(body.flow_id.trim()).await;
    let interval = match &outcome {
        PollOutcome::Pending { interval, .. } => Some(*interval),
        _ => None,
    };
    HttpResponse::Ok().json(PollResponse {
        status: outcome.status(),
        message: outcome.message(),
        interval,
    })
}

pub async fn logout(state: web::Data<AppState>) -> HttpResponse {
    let was_authenticated = state.is_authenticated();
    state.store.clear_github_token();
    state.tokens.invalidate();
    tracing::info!("GitHub credential cleared via logout");

    HttpResponse::Ok().json(LogoutResponse {
        success: true,
        message: if was_authenticated {
            "Logged out".to_string()
        } else {
            "No credential was stored".to_string()
        },
    })
}
