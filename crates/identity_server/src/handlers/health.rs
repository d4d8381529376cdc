//! GET / and GET /health.

use axum::Json;
use serde_json::{json, Value};

pub async fn banner() -> &'static str {
    "Identity Reconciliation Backend"
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
