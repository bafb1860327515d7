use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::kernel::event_queue::QueueStats;
use crate::server::app::AxumAppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    queue: QueueHealth,
}

#[derive(Serialize)]
pub struct QueueHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<QueueStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// Checks queue reachability and reports its counts.
///
/// Returns 200 OK if the queue answers, 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AxumAppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let queue_health = match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        state.deps.queue.stats(),
    )
    .await
    {
        Ok(Ok(stats)) => QueueHealth {
            status: "ok".to_string(),
            stats: Some(stats),
            error: None,
        },
        Ok(Err(e)) => QueueHealth {
            status: "error".to_string(),
            stats: None,
            error: Some(format!("Queue query failed: {}", e)),
        },
        Err(_) => QueueHealth {
            status: "error".to_string(),
            stats: None,
            error: Some("Queue query timeout (>5s)".to_string()),
        },
    };

    let is_healthy = queue_health.status == "ok";

    let overall_status = if is_healthy {
        "healthy"
    } else {
        "unhealthy"
    };

    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: overall_status.to_string(),
            queue: queue_health,
        }),
    )
}
