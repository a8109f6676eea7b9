//! Axum routes for the Alert Ingestion service.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Extension, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use incident_core::ids::{AlertId, IncidentId};
use incident_core::middleware::RequestId;
use incident_core::types::alert::{Alert, Severity};
use incident_core::{ApiError, ApiResult, PLATFORM_SCHEMA_VERSION};
use incident_persist::{AlertFilter, CorrelateParams};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestAlertRequest {
    pub service: String,
    pub severity: String,
    pub message: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub source: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub id: AlertId,
    pub service: String,
    pub severity: String,
    pub message: String,
    pub labels: BTreeMap<String, String>,
    pub source: Option<String>,
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
    pub incident_id: Option<IncidentId>,
    pub received_at: DateTime<Utc>,
    /// `"new_incident"` or `"attached_to_existing_incident"`; absent (empty)
    /// on plain reads where no correlation just happened.
    pub action: &'static str,
    /// `true` if Incident Management was unreachable and the incident was
    /// created directly against the local fallback store.
    pub degraded: bool,
}

impl AlertResponse {
    fn from_alert(alert: &Alert, action: &'static str, degraded: bool) -> Self {
        Self {
            id: alert.id,
            service: alert.service.clone(),
            severity: alert.severity.as_str().to_string(),
            message: alert.message.clone(),
            labels: alert.labels.clone(),
            source: alert.source.clone(),
            fingerprint: alert.fingerprint.clone(),
            timestamp: alert.timestamp,
            incident_id: alert.incident_id,
            received_at: alert.received_at,
            action,
            degraded,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertListQuery {
    pub service: Option<String>,
    pub severity: Option<String>,
    pub unattached_only: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CorrelateRequest {
    service: String,
    severity: String,
    title: String,
    alert_id: AlertId,
    occurred_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CorrelateResponse {
    incident_id: IncidentId,
    created: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub schema_version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub alert_store: bool,
    pub fallback_store: bool,
}

async fn ingest_alert(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<IngestAlertRequest>,
) -> impl IntoResponse {
    let start = Instant::now();
    let result = ingest_alert_inner(&state, &request_id, body).await;
    state.metrics.observe_histogram("alert_processing_seconds", &[], start.elapsed().as_secs_f64());
    match result {
        Ok(response) => (axum::http::StatusCode::CREATED, Json(response)).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn ingest_alert_inner(
    state: &AppState,
    request_id: &RequestId,
    body: IngestAlertRequest,
) -> ApiResult<AlertResponse> {
    if body.service.trim().is_empty() {
        return Err(ApiError::Validation("service must not be empty".into()));
    }
    if body.message.trim().is_empty() {
        return Err(ApiError::Validation("message must not be empty".into()));
    }
    let severity = Severity::parse(&body.severity)
        .ok_or_else(|| ApiError::Validation(format!("unknown severity: {}", body.severity)))?;

    let mut alert = Alert::new(body.service.clone(), severity, body.message.clone(), body.labels, body.source, body.timestamp);
    state.metrics.incr_counter("alerts_received_total", &[("severity", severity.as_str())]);
    state
        .alerts
        .insert(alert.clone())
        .await
        .map_err(|e| e.into_api_error())?;

    let team = state.config.resolve_team(&alert.service);
    let (incident_id, created, degraded) = resolve_incident(state, request_id, &alert, &team).await?;

    alert.attach_to(incident_id);
    state
        .alerts
        .attach_incident(alert.id, incident_id)
        .await
        .map_err(|e| e.into_api_error())?;

    if created {
        state.metrics.incr_counter("incidents_created_total", &[("severity", severity.as_str())]);
        state.metrics.incr_counter("alerts_correlated_total", &[("result", "new_incident")]);
    } else {
        state.metrics.incr_counter("alerts_correlated_total", &[("result", "attached_to_existing_incident")]);
    }

    let action = if created { "new_incident" } else { "attached_to_existing_incident" };
    Ok(AlertResponse::from_alert(&alert, action, degraded))
}

/// Resolve the incident an alert belongs to. Tries the Incident Management
/// service first (bounded retry); on exhaustion, falls back to the local
/// store so ingestion never blocks on a downstream outage.
async fn resolve_incident(
    state: &AppState,
    request_id: &RequestId,
    alert: &Alert,
    team: &str,
) -> ApiResult<(IncidentId, bool, bool)> {
    let budget = incident_core::client::RetryBudget::default();
    let request = CorrelateRequest {
        service: alert.service.clone(),
        severity: alert.severity.as_str().to_string(),
        title: format!("{}: {}", alert.service, alert.message),
        alert_id: alert.id,
        occurred_at: alert.timestamp,
    };

    let remote = budget
        .run(|| {
            state
                .incident_management
                .post_json::<CorrelateRequest, CorrelateResponse>("/api/v1/incidents/correlate", &request, request_id.as_str())
        })
        .await;

    match remote {
        Ok(response) => Ok((response.incident_id, response.created, false)),
        Err(e) => {
            tracing::warn!(request_id = request_id.as_str(), error = %e, "incident management unreachable, using local fallback");
            state.metrics.incr_counter("incident_management_fallback_total", &[]);
            let since = Utc::now() - chrono::Duration::minutes(state.config.correlation_window_minutes);
            let outcome = state
                .fallback_incidents
                .correlate_or_create(CorrelateParams {
                    service: team.to_string(),
                    severity: alert.severity,
                    since,
                    title: format!("{}: {}", alert.service, alert.message),
                    alert_id: alert.id,
                    actor: "alert-ingestion".to_string(),
                })
                .await
                .map_err(|e| e.into_api_error())?;
            Ok((outcome.incident.id, outcome.created, true))
        }
    }
}

async fn get_alert(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Path(id): Path<String>) -> impl IntoResponse {
    match get_alert_inner(&state, &id).await {
        Ok(alert) => Json(alert).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn get_alert_inner(state: &AppState, id: &str) -> ApiResult<AlertResponse> {
    let id = AlertId::parse(id).map_err(|_| ApiError::BadRequest("malformed alert id".into()))?;
    let alert = state.alerts.get(id).await.map_err(|e| e.into_api_error())?;
    let alert = alert.ok_or_else(|| ApiError::NotFound("alert not found".into()))?;
    Ok(AlertResponse::from_alert(&alert, "", false))
}

async fn list_alerts(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Query(query): Query<AlertListQuery>) -> impl IntoResponse {
    match list_alerts_inner(&state, query).await {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn list_alerts_inner(state: &AppState, query: AlertListQuery) -> ApiResult<Vec<AlertResponse>> {
    let severity = match query.severity.as_deref() {
        Some(s) => Some(Severity::parse(s).ok_or_else(|| ApiError::BadRequest("unknown severity filter".into()))?),
        None => None,
    };
    let filter = AlertFilter {
        service: query.service,
        severity,
        unattached_only: query.unattached_only.unwrap_or(false),
        limit: query.limit.unwrap_or(0),
        offset: query.offset.unwrap_or(0),
    };
    let alerts = state.alerts.list(&filter).await.map_err(|e| e.into_api_error())?;
    Ok(alerts.iter().map(|a| AlertResponse::from_alert(a, "", false)).collect())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", schema_version: PLATFORM_SCHEMA_VERSION })
}

async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let alert_store = state.alerts.is_healthy().await;
    let fallback_store = state.fallback_incidents.is_healthy().await;
    let ready = alert_store && fallback_store;
    let response = ReadinessResponse { ready, alert_store, fallback_store };
    if ready {
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
        .route("/api/v1/alerts", post(ingest_alert).get(list_alerts))
        .route("/api/v1/alerts/:id", get(get_alert))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics))
        .layer(axum::middleware::from_fn(incident_core::middleware::request_context_middleware))
        .with_state(state)
}
