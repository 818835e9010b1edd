use axum::{
    Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
};
use pkg_types::playback::CheckpointSummary;
use tracing::{info, warn};

use crate::AppState;

fn ha_disabled() -> axum::response::Response {
    (StatusCode::NOT_FOUND, "HA is disabled on this instance").into_response()
}

/// GET /api/v1/ha/checkpoints: one summary row per stored checkpoint.
pub async fn list_checkpoints(State(state): State<AppState>) -> impl IntoResponse {
    let Some(checkpoints) = &state.checkpoints else {
        return ha_disabled();
    };
    match checkpoints.get_all().await {
        Ok(all) => {
            let mut rows: Vec<CheckpointSummary> = all.iter().map(CheckpointSummary::from).collect();
            rows.sort_by(|a, b| a.session_key.cmp(&b.session_key));
            (StatusCode::OK, Json(rows)).into_response()
        }
        Err(e) => {
            warn!("Failed to list checkpoints: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Failed to list checkpoints").into_response()
        }
    }
}

/// GET /api/v1/ha/checkpoints/{key}
pub async fn get_checkpoint(
    State(state): State<AppState>,
    AxumPath(key): AxumPath<String>,
) -> impl IntoResponse {
    let Some(checkpoints) = &state.checkpoints else {
        return ha_disabled();
    };
    match checkpoints.get(&key).await {
        Ok(Some(checkpoint)) => (StatusCode::OK, Json(checkpoint)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to read checkpoint {}: {}", key, e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// DELETE /api/v1/ha/checkpoints/{key}: forget a session so it is never
/// restored. Its auto-save timer, if any, is cancelled first.
pub async fn delete_checkpoint(
    State(state): State<AppState>,
    AxumPath(key): AxumPath<String>,
) -> impl IntoResponse {
    let Some(checkpoints) = &state.checkpoints else {
        return ha_disabled();
    };
    checkpoints.stop_auto_save(&key);
    match checkpoints.delete(&key).await {
        Ok(()) => {
            info!("Dropped checkpoint {} via API", key);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            warn!("Failed to drop checkpoint {}: {}", key, e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
