use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use super::AppState;
use super::handlers;
use crate::interfaces::slack::{SlackState, slack_routes};

pub fn build_router(state: AppState, slack: Option<SlackState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .route("/jenkins/notification", post(handlers::jenkins_notification))
        .with_state(state);

    if let Some(slack) = slack {
        app = app.merge(slack_routes(slack));
    }

    app.layer(TraceLayer::new_for_http())
}
