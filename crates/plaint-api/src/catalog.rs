use axum::{Json, response::IntoResponse};
use serde_json::json;

use plaint_types::catalog::catalog;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /catalog: complaint categories, departments and programs.
pub async fn get_catalog() -> impl IntoResponse {
    Json(catalog())
}
