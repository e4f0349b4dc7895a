use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use super::{template::render_index, Server};

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn metrics(State(server): State<Arc<Server>>) -> Response {
    match server.metrics.gather() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn entries(State(server): State<Arc<Server>>) -> Response {
    Json(server.engine.list_entries().await).into_response()
}

pub async fn index(State(server): State<Arc<Server>>) -> Response {
    let entries = server.engine.list_entries().await;
    match render_index(&entries) {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            error!("Failed to render entry table: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
