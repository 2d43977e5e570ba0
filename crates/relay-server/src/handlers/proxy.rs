use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::Result;
use crate::state::AppState;

pub async fn forward(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    state.proxy.forward(&req, body).await
}
