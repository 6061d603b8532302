//! A simple health check endpoint for the exporter.

use axum::Json;
use axum::response::IntoResponse;
use serde::Serialize;

#[derive(Serialize)]
struct Status {
    is_healthy: bool,
}

pub async fn handle() -> impl IntoResponse {
    Json(Status { is_healthy: true })
}
