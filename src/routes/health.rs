use axum::{response::IntoResponse, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    service: &'static str,
}

/// Liveness probe; says nothing about model readiness.
pub async fn healthcheck() -> impl IntoResponse {
    Json(Health {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
    })
}
