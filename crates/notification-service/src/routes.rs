//! Axum routes for the Notification service.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Extension, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use incident_core::ids::{IncidentId, NotificationId};
use incident_core::middleware::RequestId;
use incident_core::types::notification::{Channel, Notification, NotificationStatus};
use incident_core::{ApiError, ApiResult, PLATFORM_SCHEMA_VERSION};
use incident_persist::{NotificationFilter, NotificationStatsSummary};
use serde::{Deserialize, Serialize};

use crate::channels;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    /// Absent for notifications not tied to a specific incident (e.g. an
    /// on-call rotation-change alert).
    pub incident_id: Option<IncidentId>,
    pub channel: String,
    pub recipient: String,
    pub message: String,
    pub severity: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: NotificationId,
    pub incident_id: IncidentId,
    pub channel: String,
    pub recipient: String,
    pub message: String,
    pub severity: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            incident_id: n.incident_id,
            channel: n.channel.as_str().to_string(),
            recipient: n.recipient,
            message: n.message,
            severity: n.severity,
            status: n.status.as_str().to_string(),
            created_at: n.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationListQuery {
    pub incident_id: Option<IncidentId>,
    pub channel: Option<String>,
    pub status: Option<String>,
    pub recipient: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StatsSummaryResponse {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
    pub by_channel: std::collections::BTreeMap<String, u64>,
    pub by_severity: std::collections::BTreeMap<String, u64>,
}

impl From<NotificationStatsSummary> for StatsSummaryResponse {
    fn from(s: NotificationStatsSummary) -> Self {
        Self { total: s.total, sent: s.sent, failed: s.failed, by_channel: s.by_channel, by_severity: s.by_severity }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub schema_version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub notification_store: bool,
}

async fn notify(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<NotifyRequest>,
) -> impl IntoResponse {
    let start = Instant::now();
    let result = notify_inner(&state, body).await;
    state.metrics.observe_histogram("dispatch_duration_seconds", &[], start.elapsed().as_secs_f64());
    match result {
        Ok(response) => (axum::http::StatusCode::CREATED, Json(response)).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn notify_inner(state: &AppState, body: NotifyRequest) -> ApiResult<NotificationResponse> {
    let recipient = body.recipient.trim().to_string();
    if recipient.is_empty() {
        return Err(ApiError::Validation("recipient must not be empty".into()));
    }
    let channel = Channel::parse(&body.channel).ok_or_else(|| ApiError::Validation(format!("unknown channel: {}", body.channel)))?;
    let incident_id = body.incident_id.unwrap_or_else(IncidentId::new);

    let mut notification = Notification::new(incident_id, channel, recipient, body.message, body.severity, body.metadata, NotificationStatus::Sent);

    let outcome = channels::dispatch(&state.http, &state.config, channel, &notification).await;
    match outcome {
        Ok(()) => {
            notification.status = NotificationStatus::Sent;
            state.metrics.incr_counter("notifications_sent_total", &[("channel", channel.as_str()), ("status", "sent")]);
        }
        Err(e) => {
            tracing::warn!(error = %e, channel = channel.as_str(), "notification delivery failed");
            notification.status = NotificationStatus::Failed;
            state.metrics.incr_counter("notifications_sent_total", &[("channel", channel.as_str()), ("status", "failed")]);
        }
    }

    state.notifications.insert(notification.clone()).await.map_err(|e| e.into_api_error())?;
    Ok(NotificationResponse::from(notification))
}

async fn get_notification(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Path(id): Path<String>) -> impl IntoResponse {
    match get_notification_inner(&state, &id).await {
        Ok(notification) => Json(notification).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn get_notification_inner(state: &AppState, id: &str) -> ApiResult<NotificationResponse> {
    let id = NotificationId::parse(id).map_err(|_| ApiError::BadRequest("malformed notification id".into()))?;
    let notification = state.notifications.get(id).await.map_err(|e| e.into_api_error())?;
    let notification = notification.ok_or_else(|| ApiError::NotFound("notification not found".into()))?;
    Ok(NotificationResponse::from(notification))
}

async fn list_notifications(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Query(query): Query<NotificationListQuery>) -> impl IntoResponse {
    match list_notifications_inner(&state, query).await {
        Ok(notifications) => Json(notifications).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn list_notifications_inner(state: &AppState, query: NotificationListQuery) -> ApiResult<Vec<NotificationResponse>> {
    let channel = match query.channel.as_deref() {
        Some(c) => Some(Channel::parse(c).ok_or_else(|| ApiError::BadRequest("unknown channel filter".into()))?),
        None => None,
    };
    let status = match query.status.as_deref() {
        Some(s) => Some(match s {
            "sent" => NotificationStatus::Sent,
            "failed" => NotificationStatus::Failed,
            other => return Err(ApiError::BadRequest(format!("unknown status filter: {other}"))),
        }),
        None => None,
    };
    let filter = NotificationFilter { incident_id: query.incident_id, channel, status, recipient: query.recipient, limit: query.limit.unwrap_or(0) };
    let notifications = state.notifications.list(&filter).await.map_err(|e| e.into_api_error())?;
    Ok(notifications.into_iter().map(NotificationResponse::from).collect())
}

async fn stats_summary(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>) -> impl IntoResponse {
    match state.notifications.stats_summary().await {
        Ok(summary) => Json(StatsSummaryResponse::from(summary)).into_response(),
        Err(e) => e.into_api_error().into_response_with_request_id(request_id.as_str()),
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", schema_version: PLATFORM_SCHEMA_VERSION })
}

async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let notification_store = state.notifications.is_healthy().await;
    let response = ReadinessResponse { ready: notification_store, notification_store };
    if response.ready {
        Json(response).into_response()
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/notify", post(notify))
        .route("/api/v1/notifications", get(list_notifications))
        .route("/api/v1/notifications/:id", get(get_notification))
        .route("/api/v1/notifications/stats/summary", get(stats_summary))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics))
        .layer(axum::middleware::from_fn(incident_core::middleware::request_context_middleware))
        .with_state(state)
}
