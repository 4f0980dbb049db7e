//! Route handlers.

use axum::response::IntoResponse;
use axum::Json;

/// Greeting served behind the rate limiter.
pub async fn welcome_handler() -> &'static str {
    "welcome"
}

/// Liveness check. It is routed outside the rate limiter.
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
