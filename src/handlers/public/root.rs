use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::database::DatabaseManager;

/// GET / - service info
pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "Atlas",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Operations console API for a trap-neuter-return program",
            "endpoints": {
                "health": "/health (public)",
                "auth": "/auth/login, /auth/logout (public)",
                "intake": "POST /api/intake (public)",
                "people": "/api/people[/:id] (session)",
                "cats": "/api/cats[/:id] (session)",
                "places": "/api/places[/:id] (session)",
                "requests": "/api/requests[/:id] (session)",
                "map": "/api/map/places (session)",
                "email": "/api/email/* (session)",
                "match_candidates": "/api/match-candidates (session)",
                "admin": "/api/admin/* (admin)",
            }
        }
    }))
}

/// GET /health - 200 when the database answers, 503 otherwise
pub async fn health() -> impl IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": { "status": "ok", "timestamp": now, "database": "ok" }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "data": { "status": "degraded", "timestamp": now, "database": "unavailable" }
                })),
            )
        }
    }
}
