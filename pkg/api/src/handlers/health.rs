use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use pkg_types::lease::HealthStatus;

use crate::AppState;

/// GET /healthz: liveness plus this instance's role.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let status = HealthStatus {
        status: "ok".to_string(),
        instance_id: state.election.id().to_string(),
        is_leader: state.election.is_leader(),
        ha_enabled: state.ha_enabled(),
        store: state.store_backend().to_string(),
        checked_at: Utc::now(),
    };
    (StatusCode::OK, Json(status)).into_response()
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}
