mod health;
mod socket;

use crate::server::SharedState;
use axum::{routing::get, Router};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(socket::emotion_socket))
        .route("/health", get(health::healthcheck))
}
