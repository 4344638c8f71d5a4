use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::warn;

use super::AppState;
use crate::core::notify::{DISABLED_NOTICE, NotifyError, RouteOutcome};

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "domain": state.ctx.settings.domain,
        "notifications": state.ctx.settings.notifications.receive,
    }))
}

pub async fn jenkins_notification(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Response {
    match state.notifications.route(payload).await {
        Ok(RouteOutcome::Disabled) => (StatusCode::OK, DISABLED_NOTICE).into_response(),
        Ok(RouteOutcome::Delivered { grid, rooms }) => {
            Json(json!({ "status": "ok", "grid": grid, "rooms": rooms })).into_response()
        }
        Err(e) => {
            warn!("Rejected Jenkins notification: {}", e);
            let status = match e {
                NotifyError::Unroutable(_) => StatusCode::BAD_REQUEST,
                NotifyError::Payload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}
