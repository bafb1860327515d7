//! Application setup and server configuration.

use std::time::Duration;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::ServerDeps;
use crate::server::routes::{health_handler, slack_events_handler};

/// Upper bound for one webhook or health request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub deps: ServerDeps,
}

/// Build the Axum application router
pub fn build_app(deps: ServerDeps) -> Router {
    let app_state = AxumAppState { deps };

    Router::new()
        // Slack Events API webhook
        .route("/slack/events", post(slack_events_handler))
        // Health check
        .route("/health", get(health_handler))
        .layer(Extension(app_state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
}
