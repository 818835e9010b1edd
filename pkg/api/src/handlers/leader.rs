use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use pkg_constants::state::heartbeat_key;
use pkg_types::lease::{LeaderInfo, parse_heartbeat};
use tracing::warn;

use crate::AppState;

/// GET /api/v1/ha/leader: current lease holder and its last heartbeat.
pub async fn get_leader(State(state): State<AppState>) -> impl IntoResponse {
    let instance_id = state.election.id().to_string();

    let Some(store) = &state.store else {
        let info = LeaderInfo {
            leader_id: Some(instance_id.clone()),
            instance_id,
            is_self: true,
            last_heartbeat: None,
        };
        return (StatusCode::OK, Json(info)).into_response();
    };

    let leader_id = match state.election.get_leader_id().await {
        Ok(id) => id,
        Err(e) => {
            warn!("Failed to read leader lease: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "Coordination store unavailable")
                .into_response();
        }
    };

    let last_heartbeat = match &leader_id {
        Some(id) => store
            .get(&heartbeat_key(id))
            .await
            .ok()
            .flatten()
            .and_then(|raw| parse_heartbeat(&raw)),
        None => None,
    };

    let info = LeaderInfo {
        is_self: leader_id.as_deref() == Some(instance_id.as_str()),
        leader_id,
        instance_id,
        last_heartbeat,
    };
    (StatusCode::OK, Json(info)).into_response()
}
