use axum::Json;
use serde_json::{json, Value};

pub const SERVICE_NAME: &str = "cv-review-api";

/// GET /health
/// Liveness only; does not touch the database.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
