//! Axum routes for the Incident Management service.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Extension, Path, Query, State},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use incident_core::ids::{AlertId, IncidentId};
use incident_core::middleware::RequestId;
use incident_core::types::alert::Severity;
use incident_core::types::incident::{Incident, IncidentStatus};
use incident_core::types::timeline::{EventType, IncidentNote, TimelineEvent};
use incident_core::{ApiError, ApiResult, PLATFORM_SCHEMA_VERSION};
use incident_persist::{CorrelateParams, IncidentFilter, IncidentPatch};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateIncidentRequest {
    pub title: String,
    pub service: String,
    pub severity: String,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IncidentResponse {
    pub id: IncidentId,
    pub title: String,
    pub service: String,
    pub severity: String,
    pub status: String,
    pub assigned_to: Option<String>,
    pub alert_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub mtta_seconds: Option<i64>,
    pub mttr_seconds: Option<i64>,
}

impl From<Incident> for IncidentResponse {
    fn from(i: Incident) -> Self {
        Self {
            id: i.id,
            title: i.title,
            service: i.service,
            severity: i.severity.as_str().to_string(),
            status: i.status.as_str().to_string(),
            assigned_to: i.assigned_to,
            alert_count: i.alert_count,
            created_at: i.created_at,
            updated_at: i.updated_at,
            acknowledged_at: i.acknowledged_at,
            resolved_at: i.resolved_at,
            mtta_seconds: i.mtta_seconds,
            mttr_seconds: i.mttr_seconds,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CorrelateRequest {
    pub service: String,
    pub severity: String,
    pub title: String,
    pub alert_id: AlertId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CorrelateResponse {
    pub incident_id: IncidentId,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
pub struct PatchIncidentRequest {
    pub status: Option<String>,
    /// `null` clears the assignee; the key's absence leaves it untouched.
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub assigned_to: Option<Option<String>>,
    /// Appends a note authored by `actor` in the same transaction as the
    /// status/assignee change.
    pub note: Option<String>,
    pub actor: Option<String>,
}

fn deserialize_double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

#[derive(Debug, Deserialize)]
pub struct AddNoteRequest {
    pub author: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct NoteResponse {
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<IncidentNote> for NoteResponse {
    fn from(n: IncidentNote) -> Self {
        Self { author: n.author, content: n.content, created_at: n.created_at }
    }
}

#[derive(Debug, Serialize)]
pub struct TimelineEventResponse {
    pub event_type: String,
    pub actor: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<TimelineEvent> for TimelineEventResponse {
    fn from(e: TimelineEvent) -> Self {
        Self { event_type: format!("{:?}", e.event_type), actor: e.actor, detail: e.detail, created_at: e.created_at }
    }
}

#[derive(Debug, Deserialize)]
pub struct IncidentListQuery {
    pub status: Option<String>,
    pub service: Option<String>,
    pub severity: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct IncidentMetricsResponse {
    pub incident_id: IncidentId,
    pub mtta_seconds: Option<i64>,
    pub mttr_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatsSummaryResponse {
    pub total: u64,
    pub open_count: u64,
    pub by_status: std::collections::BTreeMap<String, u64>,
    pub avg_mtta_seconds: Option<f64>,
    pub avg_mttr_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub schema_version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub store: bool,
}

#[derive(Debug, Deserialize)]
struct ContactDto {
    name: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct OnCallLookupResponse {
    primary: Option<ContactDto>,
}

#[derive(Debug, Serialize)]
struct NotifyRequest {
    incident_id: IncidentId,
    channel: String,
    recipient: String,
    message: String,
    severity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotifyResponse {
    #[allow(dead_code)]
    id: String,
}

async fn create_incident(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CreateIncidentRequest>,
) -> impl IntoResponse {
    let start = Instant::now();
    let idempotency_key = headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(|s| s.to_string());
    let result = create_incident_inner(&state, &request_id, body, idempotency_key).await;
    state.metrics.observe_histogram("request_duration_seconds", &[("route", "create_incident")], start.elapsed().as_secs_f64());
    match result {
        Ok(incident) => (axum::http::StatusCode::CREATED, Json(IncidentResponse::from(incident))).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn create_incident_inner(
    state: &AppState,
    request_id: &RequestId,
    body: CreateIncidentRequest,
    idempotency_key: Option<String>,
) -> ApiResult<Incident> {
    if let Some(key) = &idempotency_key {
        if let Some(existing_id) = state.idempotent_lookup(key) {
            if let Some(incident) = state.incidents.get(existing_id).await.map_err(|e| e.into_api_error())? {
                return Ok(incident);
            }
        }
    }

    if body.title.trim().is_empty() {
        return Err(ApiError::Validation("title must not be empty".into()));
    }
    let severity = Severity::parse(&body.severity).ok_or_else(|| ApiError::Validation(format!("unknown severity: {}", body.severity)))?;

    let incident = Incident::new(body.title, body.service.clone(), severity, body.assigned_to);
    let incident_id = incident.id;
    let event = TimelineEvent::new(incident_id, EventType::Created, "incident-management", json!({}));
    state.incidents.create(incident.clone(), event).await.map_err(|e| e.into_api_error())?;
    state.metrics.incr_counter("incidents_created_total", &[("severity", severity.as_str())]);
    refresh_status_gauge(state).await;

    if let Some(key) = idempotency_key {
        state.idempotent_store(key, incident_id);
    }

    notify_on_call(state, request_id, &incident);
    Ok(incident)
}

/// Recompute `incidents_by_status` from the store rather than tracking
/// per-transition deltas, so a gauge value can never drift out of sync with
/// what `stats_summary` itself reports.
async fn refresh_status_gauge(state: &AppState) {
    if let Ok(summary) = state.incidents.stats_summary().await {
        for status in ["open", "acknowledged", "in_progress", "resolved"] {
            let count = *summary.by_status.get(status).unwrap_or(&0) as i64;
            state.metrics.set_gauge("incidents_by_status", &[("status", status)], count);
        }
    }
}

async fn correlate(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<CorrelateRequest>,
) -> impl IntoResponse {
    match correlate_inner(&state, &request_id, body).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn correlate_inner(state: &AppState, request_id: &RequestId, body: CorrelateRequest) -> ApiResult<CorrelateResponse> {
    let severity = Severity::parse(&body.severity).ok_or_else(|| ApiError::Validation(format!("unknown severity: {}", body.severity)))?;
    let team = state.config.resolve_team(&body.service);
    let since = Utc::now() - chrono::Duration::minutes(state.config.correlation_window_minutes);

    let outcome = state
        .incidents
        .correlate_or_create(CorrelateParams {
            service: team,
            severity,
            since,
            title: body.title,
            alert_id: body.alert_id,
            actor: "alert-ingestion".to_string(),
        })
        .await
        .map_err(|e| e.into_api_error())?;

    if outcome.created {
        state.metrics.incr_counter("incidents_created_total", &[("severity", severity.as_str())]);
        notify_on_call(state, request_id, &outcome.incident);
    } else {
        state.metrics.incr_counter("incidents_correlated_total", &[]);
    }
    refresh_status_gauge(state).await;
    Ok(CorrelateResponse { incident_id: outcome.incident.id, created: outcome.created })
}

/// Look up the on-call contact and send a notification without blocking the
/// caller on either downstream service.
fn notify_on_call(state: &AppState, request_id: &RequestId, incident: &Incident) {
    let oncall = state.oncall.clone();
    let notifications = state.notifications.clone();
    let metrics = state.metrics.clone();
    let request_id = request_id.as_str().to_string();
    let incident_id = incident.id;
    let team = incident.service.clone();
    let severity = incident.severity.as_str().to_string();
    let title = incident.title.clone();

    tokio::spawn(async move {
        let lookup: Result<OnCallLookupResponse, _> = oncall
            .get_json(&format!("/api/v1/oncall/current?team={team}"), &request_id)
            .await;
        let recipient = match lookup {
            Ok(OnCallLookupResponse { primary: Some(contact) }) => contact.email,
            Ok(OnCallLookupResponse { primary: None }) => {
                tracing::warn!(request_id = %request_id, team = %team, "no on-call primary configured");
                metrics.incr_counter("notifications_dispatch_failed_total", &[]);
                return;
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, team = %team, error = %e, "on-call lookup failed");
                metrics.incr_counter("notifications_dispatch_failed_total", &[]);
                return;
            }
        };

        let notify = NotifyRequest {
            incident_id,
            channel: "mock".to_string(),
            recipient,
            message: format!("New incident: {title}"),
            severity: Some(severity),
        };
        if let Err(e) = notifications.post_json::<NotifyRequest, NotifyResponse>("/api/v1/notify", &notify, &request_id).await {
            tracing::warn!(request_id = %request_id, error = %e, "notify dispatch failed");
            metrics.incr_counter("notifications_dispatch_failed_total", &[]);
        }
    });
}

async fn get_incident(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Path(id): Path<String>) -> impl IntoResponse {
    match get_incident_inner(&state, &id).await {
        Ok(incident) => Json(IncidentResponse::from(incident)).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn get_incident_inner(state: &AppState, id: &str) -> ApiResult<Incident> {
    let id = parse_incident_id(id)?;
    state.incidents.get(id).await.map_err(|e| e.into_api_error())?.ok_or_else(|| ApiError::NotFound("incident not found".into()))
}

fn parse_incident_id(s: &str) -> ApiResult<IncidentId> {
    IncidentId::parse(s).map_err(|_| ApiError::BadRequest("malformed incident id".into()))
}

async fn list_incidents(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Query(query): Query<IncidentListQuery>) -> impl IntoResponse {
    match list_incidents_inner(&state, query).await {
        Ok(incidents) => Json(incidents).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn list_incidents_inner(state: &AppState, query: IncidentListQuery) -> ApiResult<Vec<IncidentResponse>> {
    let status = match query.status.as_deref() {
        Some(s) => Some(IncidentStatus::parse(s).ok_or_else(|| ApiError::BadRequest("unknown status filter".into()))?),
        None => None,
    };
    let severity = match query.severity.as_deref() {
        Some(s) => Some(Severity::parse(s).ok_or_else(|| ApiError::BadRequest("unknown severity filter".into()))?),
        None => None,
    };
    let filter = IncidentFilter { status, service: query.service, severity, limit: query.limit.unwrap_or(0), offset: query.offset.unwrap_or(0) };
    let incidents = state.incidents.list(&filter).await.map_err(|e| e.into_api_error())?;
    Ok(incidents.into_iter().map(IncidentResponse::from).collect())
}

async fn patch_incident(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    Json(body): Json<PatchIncidentRequest>,
) -> impl IntoResponse {
    match patch_incident_inner(&state, &id, body).await {
        Ok(incident) => Json(IncidentResponse::from(incident)).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn patch_incident_inner(state: &AppState, id: &str, body: PatchIncidentRequest) -> ApiResult<Incident> {
    let id = parse_incident_id(id)?;
    let status = match body.status.as_deref() {
        Some(s) => Some(IncidentStatus::parse(s).ok_or_else(|| ApiError::Validation(format!("unknown status: {s}")))?),
        None => None,
    };
    let was_acknowledged = status.is_some_and(|s| matches!(s, IncidentStatus::Acknowledged));
    let was_resolved = status.is_some_and(|s| matches!(s, IncidentStatus::Resolved));
    let patch = IncidentPatch { status, assigned_to: body.assigned_to, note: body.note, actor: body.actor.unwrap_or_else(|| "api".to_string()) };
    let outcome = state.incidents.patch(id, patch).await.map_err(|e| e.into_api_error())?;
    state.metrics.incr_counter("incidents_patched_total", &[]);
    // `transition_to` backfills `mtta_seconds` when an incident resolves
    // without ever being acknowledged, so a direct open -> resolved patch
    // observes both histograms.
    if was_acknowledged || was_resolved {
        if let Some(mtta) = outcome.incident.mtta_seconds {
            state.metrics.observe_histogram("incident_mtta_seconds", &[], mtta as f64);
        }
    }
    if was_resolved {
        if let Some(mttr) = outcome.incident.mttr_seconds {
            state.metrics.observe_histogram("incident_mttr_seconds", &[], mttr as f64);
        }
    }
    refresh_status_gauge(state).await;
    Ok(outcome.incident)
}

async fn add_note(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    Json(body): Json<AddNoteRequest>,
) -> impl IntoResponse {
    match add_note_inner(&state, &id, body).await {
        Ok(()) => axum::http::StatusCode::CREATED.into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn add_note_inner(state: &AppState, id: &str, body: AddNoteRequest) -> ApiResult<()> {
    let id = parse_incident_id(id)?;
    if body.content.trim().is_empty() {
        return Err(ApiError::Validation("note content must not be empty".into()));
    }
    let note = IncidentNote::new(id, body.author.clone(), body.content.clone());
    let event = TimelineEvent::new(id, EventType::NoteAdded, body.author, json!({ "content": note.content }));
    state.incidents.add_note(id, note, event).await.map_err(|e| e.into_api_error())?;
    Ok(())
}

async fn list_notes(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Path(id): Path<String>) -> impl IntoResponse {
    match list_notes_inner(&state, &id).await {
        Ok(notes) => Json(notes.into_iter().map(NoteResponse::from).collect::<Vec<_>>()).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn list_notes_inner(state: &AppState, id: &str) -> ApiResult<Vec<IncidentNote>> {
    let id = parse_incident_id(id)?;
    state.incidents.notes(id).await.map_err(|e| e.into_api_error())
}

async fn timeline(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Path(id): Path<String>) -> impl IntoResponse {
    match timeline_inner(&state, &id).await {
        Ok(events) => Json(events.into_iter().map(TimelineEventResponse::from).collect::<Vec<_>>()).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn timeline_inner(state: &AppState, id: &str) -> ApiResult<Vec<TimelineEvent>> {
    let id = parse_incident_id(id)?;
    state.incidents.timeline(id).await.map_err(|e| e.into_api_error())
}

async fn incident_metrics(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Path(id): Path<String>) -> impl IntoResponse {
    match incident_metrics_inner(&state, &id).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn incident_metrics_inner(state: &AppState, id: &str) -> ApiResult<IncidentMetricsResponse> {
    let id = parse_incident_id(id)?;
    let incident = state.incidents.get(id).await.map_err(|e| e.into_api_error())?.ok_or_else(|| ApiError::NotFound("incident not found".into()))?;
    Ok(IncidentMetricsResponse { incident_id: id, mtta_seconds: incident.mtta_seconds, mttr_seconds: incident.mttr_seconds })
}

async fn stats_summary(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>) -> impl IntoResponse {
    match state.incidents.stats_summary().await {
        Ok(summary) => Json(StatsSummaryResponse {
            total: summary.total,
            open_count: summary.open_count,
            by_status: summary.by_status,
            avg_mtta_seconds: summary.avg_mtta_seconds,
            avg_mttr_seconds: summary.avg_mttr_seconds,
        })
        .into_response(),
        Err(e) => e.into_api_error().into_response_with_request_id(request_id.as_str()),
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", schema_version: PLATFORM_SCHEMA_VERSION })
}

async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.incidents.is_healthy().await;
    let response = ReadinessResponse { ready: store, store };
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
        .route("/api/v1/incidents", post(create_incident).get(list_incidents))
        .route("/api/v1/incidents/correlate", post(correlate))
        .route("/api/v1/incidents/stats/summary", get(stats_summary))
        .route("/api/v1/incidents/:id", get(get_incident).patch(patch_incident))
        .route("/api/v1/incidents/:id/notes", post(add_note).get(list_notes))
        .route("/api/v1/incidents/:id/timeline", get(timeline))
        .route("/api/v1/incidents/:id/metrics", get(incident_metrics))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics))
        .layer(axum::middleware::from_fn(incident_core::middleware::request_context_middleware))
        .with_state(state)
}
