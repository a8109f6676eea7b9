//! Axum routes for the On-Call & Escalation service.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Extension, MatchedPath, Path, Query, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use incident_core::ids::IncidentId;
use incident_core::middleware::RequestId;
use incident_core::types::oncall::{Escalation, HistoryEvent, HistoryEventKind, Member, Override, RotationType, Role, Schedule};
use incident_core::{ApiError, ApiResult, PLATFORM_SCHEMA_VERSION};
use incident_persist::SchedulePatch;
use serde::{Deserialize, Serialize};

use crate::rotation::{current_on_call, CurrentOnCall};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ContactDto {
    pub name: String,
    pub email: String,
}

impl From<&Member> for ContactDto {
    fn from(member: &Member) -> Self {
        Self { name: member.name.clone(), email: member.email.clone() }
    }
}

#[derive(Debug, Serialize)]
pub struct CurrentOnCallResponse {
    pub team: String,
    pub primary: Option<ContactDto>,
    pub secondary: Option<ContactDto>,
    pub overridden: bool,
}

#[derive(Debug, Deserialize)]
pub struct CurrentOnCallQuery {
    pub team: String,
}

#[derive(Debug, Deserialize)]
pub struct MemberRequest {
    pub name: String,
    pub email: String,
    pub role: String,
}

impl MemberRequest {
    fn into_member(self) -> ApiResult<Member> {
        let role = Role::parse(&self.role).ok_or_else(|| ApiError::Validation(format!("unknown role: {}", self.role)))?;
        Ok(Member { name: self.name, email: self.email, role })
    }
}

#[derive(Debug, Deserialize)]
pub struct UpsertScheduleRequest {
    pub team: String,
    pub rotation_type: String,
    pub members: Vec<MemberRequest>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SetMembersRequest {
    pub rotation_type: Option<String>,
    #[serde(default)]
    pub add_members: Vec<MemberRequest>,
    #[serde(default)]
    pub remove_members: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub team: String,
    pub rotation_type: String,
    pub members: Vec<MemberResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub name: String,
    pub email: String,
    pub role: String,
}

impl From<Schedule> for ScheduleResponse {
    fn from(schedule: Schedule) -> Self {
        Self {
            team: schedule.team,
            rotation_type: rotation_type_str(schedule.rotation_type).to_string(),
            members: schedule
                .members
                .into_iter()
                .map(|m| MemberResponse { name: m.name, email: m.email, role: role_str(m.role).to_string() })
                .collect(),
            created_at: schedule.created_at,
            updated_at: schedule.updated_at,
        }
    }
}

fn rotation_type_str(rotation_type: RotationType) -> &'static str {
    match rotation_type {
        RotationType::Daily => "daily",
        RotationType::Weekly => "weekly",
        RotationType::Biweekly => "biweekly",
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::Primary => "primary",
        Role::Secondary => "secondary",
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOverrideRequest {
    pub team: String,
    pub user_name: String,
    pub user_email: String,
    pub reason: Option<String>,
    pub duration_hours: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct OverrideResponse {
    pub team: String,
    pub user_name: String,
    pub user_email: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<Override> for OverrideResponse {
    fn from(over: Override) -> Self {
        Self {
            team: over.team,
            user_name: over.user_name,
            user_email: over.user_email,
            reason: over.reason,
            created_at: over.created_at,
            expires_at: over.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub team: String,
    pub incident_id: IncidentId,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EscalationResponse {
    pub id: String,
    pub team: String,
    pub incident_id: IncidentId,
    pub reason: Option<String>,
    pub escalated_to: Option<ContactDto>,
    pub created_at: DateTime<Utc>,
}

impl From<Escalation> for EscalationResponse {
    fn from(escalation: Escalation) -> Self {
        Self {
            id: escalation.id.to_string(),
            team: escalation.team,
            incident_id: escalation.incident_id,
            reason: escalation.reason,
            escalated_to: escalation.escalated_to.as_ref().map(ContactDto::from),
            created_at: escalation.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub team: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryEventResponse {
    pub team: String,
    pub kind: &'static str,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl From<HistoryEvent> for HistoryEventResponse {
    fn from(event: HistoryEvent) -> Self {
        let kind = match event.kind {
            HistoryEventKind::RotationChanged => "rotation_changed",
            HistoryEventKind::OverrideSet => "override_set",
            HistoryEventKind::OverrideExpired => "override_expired",
        };
        Self { team: event.team, kind, detail: event.detail, created_at: event.created_at }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub teams: usize,
    pub overrides_active: usize,
}

#[derive(Debug, Serialize)]
pub struct NotifyRequest {
    incident_id: Option<IncidentId>,
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

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub schema_version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub oncall_store: bool,
}

async fn current(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<CurrentOnCallQuery>,
) -> impl IntoResponse {
    let start = Instant::now();
    let result = current_inner(&state, &request_id, query).await;
    state.metrics.observe_histogram("lookup_duration_seconds", &[], start.elapsed().as_secs_f64());
    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn current_inner(state: &AppState, request_id: &RequestId, query: CurrentOnCallQuery) -> ApiResult<CurrentOnCallResponse> {
    let team = query.team;
    state.metrics.incr_counter("oncall_lookups_total", &[("team", &team)]);
    let schedule = state.oncall.get_schedule(&team).await.map_err(|e| e.into_api_error())?;
    let schedule = schedule.ok_or_else(|| ApiError::NotFound("no schedule configured for team".into()))?;

    let now = Utc::now();
    let CurrentOnCall { primary: rotation_primary, secondary } = current_on_call(&schedule, now);

    let over = state.oncall.active_override(&team, now).await.map_err(|e| e.into_api_error())?;
    let (primary, overridden) = match over {
        Some(over) => (Some(Member { name: over.user_name, email: over.user_email, role: Role::Primary }), true),
        None => (rotation_primary, false),
    };

    detect_rotation_change(state, request_id, &team, primary.as_ref());

    Ok(CurrentOnCallResponse {
        team,
        primary: primary.as_ref().map(ContactDto::from),
        secondary: secondary.as_ref().map(ContactDto::from),
        overridden,
    })
}

/// Compare the newly resolved primary contact against the last one observed
/// for this team. A change (including the first-ever observation is not
/// treated as a change) fires a fire-and-forget notification, mirroring
/// Incident Management's `notify_on_call` dispatch pattern.
fn detect_rotation_change(state: &AppState, request_id: &RequestId, team: &str, primary: Option<&Member>) {
    let previous = {
        let mut cache = state.last_known_primary.write();
        match primary {
            Some(member) => cache.insert(team.to_string(), member.email.clone()),
            None => cache.remove(team),
        }
    };

    let (Some(previous), Some(current_member)) = (previous, primary) else {
        return;
    };
    if previous == current_member.email {
        return;
    }

    let team = team.to_string();
    state.metrics.incr_counter("oncall_rotation_changes_total", &[("team", &team)]);
    let notifications = state.notifications.clone();
    let oncall = state.oncall.clone();
    let metrics = state.metrics.clone();
    let request_id = request_id.as_str().to_string();
    let recipient = current_member.email.clone();

    tokio::spawn(async move {
        let event = HistoryEvent::new(team.clone(), HistoryEventKind::RotationChanged, format!("primary on-call is now {recipient}"));
        if let Err(e) = oncall.record_history(event).await {
            tracing::warn!(team = %team, error = %e, "failed to record rotation-change history");
        }

        let notify = NotifyRequest {
            incident_id: None,
            channel: "mock".to_string(),
            recipient,
            message: format!("You are now the primary on-call for {team}"),
            severity: None,
        };
        if let Err(e) = notifications.post_json::<NotifyRequest, NotifyResponse>("/api/v1/notify", &notify, &request_id).await {
            tracing::warn!(request_id = %request_id, team = %team, error = %e, "rotation-change notify dispatch failed");
            metrics.incr_counter("notify_dispatch_failed_total", &[]);
        }
    });
}

async fn upsert_schedule(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Json(body): Json<UpsertScheduleRequest>) -> impl IntoResponse {
    match upsert_schedule_inner(&state, body).await {
        Ok(schedule) => (axum::http::StatusCode::CREATED, Json(schedule)).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn upsert_schedule_inner(state: &AppState, body: UpsertScheduleRequest) -> ApiResult<ScheduleResponse> {
    if body.team.trim().is_empty() {
        return Err(ApiError::Validation("team must not be empty".into()));
    }
    let rotation_type = RotationType::parse(&body.rotation_type)
        .ok_or_else(|| ApiError::Validation(format!("unknown rotation type: {}", body.rotation_type)))?;
    let members: ApiResult<Vec<Member>> = body.members.into_iter().map(MemberRequest::into_member).collect();
    let schedule = Schedule::new(body.team, rotation_type, members?).map_err(|e| ApiError::Validation(e.to_string()))?;
    let response = ScheduleResponse::from(schedule.clone());
    state.oncall.upsert_schedule(schedule).await.map_err(|e| e.into_api_error())?;
    refresh_active_schedules_gauge(state).await;
    Ok(response)
}

/// Recompute `oncall_active_schedules` from the store so the gauge never
/// drifts from whatever `list_schedules` itself would report.
async fn refresh_active_schedules_gauge(state: &AppState) {
    if let Ok(schedules) = state.oncall.list_schedules().await {
        state.metrics.set_gauge("oncall_active_schedules", &[], schedules.len() as i64);
    }
}

/// Recompute `oncall_overrides_active` the same way `list_overrides_inner`
/// enumerates them, so the lazy-expiry check stays the single source of truth.
async fn refresh_overrides_gauge(state: &AppState) {
    let Ok(teams) = state.oncall.teams().await else {
        return;
    };
    let now = Utc::now();
    let mut active = 0i64;
    for team in &teams {
        if matches!(state.oncall.active_override(team, now).await, Ok(Some(_))) {
            active += 1;
        }
    }
    state.metrics.set_gauge("oncall_overrides_active", &[], active);
}

async fn list_schedules(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>) -> impl IntoResponse {
    match state.oncall.list_schedules().await {
        Ok(schedules) => Json(schedules.into_iter().map(ScheduleResponse::from).collect::<Vec<_>>()).into_response(),
        Err(e) => e.into_api_error().into_response_with_request_id(request_id.as_str()),
    }
}

async fn get_schedule(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Path(team): Path<String>) -> impl IntoResponse {
    match get_schedule_inner(&state, &team).await {
        Ok(schedule) => Json(schedule).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn get_schedule_inner(state: &AppState, team: &str) -> ApiResult<ScheduleResponse> {
    let schedule = state.oncall.get_schedule(team).await.map_err(|e| e.into_api_error())?;
    let schedule = schedule.ok_or_else(|| ApiError::NotFound("schedule not found".into()))?;
    Ok(ScheduleResponse::from(schedule))
}

async fn set_members(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(team): Path<String>,
    Json(body): Json<SetMembersRequest>,
) -> impl IntoResponse {
    match set_members_inner(&state, &team, body).await {
        Ok(schedule) => Json(schedule).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn set_members_inner(state: &AppState, team: &str, body: SetMembersRequest) -> ApiResult<ScheduleResponse> {
    let rotation_type = match body.rotation_type.as_deref() {
        Some(s) => Some(RotationType::parse(s).ok_or_else(|| ApiError::Validation(format!("unknown rotation type: {s}")))?),
        None => None,
    };
    let add_members: ApiResult<Vec<Member>> = body.add_members.into_iter().map(MemberRequest::into_member).collect();
    let patch = SchedulePatch { rotation_type, add_members: add_members?, remove_members: body.remove_members };
    let schedule = state.oncall.set_members(team, patch).await.map_err(|e| e.into_api_error())?;
    Ok(ScheduleResponse::from(schedule))
}

async fn delete_schedule(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Path(team): Path<String>) -> impl IntoResponse {
    let result = state.oncall.delete_schedule(&team).await;
    if result.is_ok() {
        refresh_active_schedules_gauge(&state).await;
    }
    match result {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_api_error().into_response_with_request_id(request_id.as_str()),
    }
}

async fn create_override(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Json(body): Json<CreateOverrideRequest>) -> impl IntoResponse {
    match create_override_inner(&state, body).await {
        Ok(over) => (axum::http::StatusCode::CREATED, Json(over)).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn create_override_inner(state: &AppState, body: CreateOverrideRequest) -> ApiResult<OverrideResponse> {
    if body.user_email.trim().is_empty() {
        return Err(ApiError::Validation("user_email must not be empty".into()));
    }
    let hours = body.duration_hours.unwrap_or(state.config.default_override_hours);
    if !(1..=168).contains(&hours) {
        return Err(ApiError::Validation("duration_hours must be between 1 and 168".into()));
    }
    let now = Utc::now();
    let over = Override {
        team: body.team,
        user_name: body.user_name,
        user_email: body.user_email,
        reason: body.reason,
        created_at: now,
        expires_at: now + chrono::Duration::hours(hours as i64),
    };
    let response = OverrideResponse::from(over.clone());
    state.oncall.set_override(over).await.map_err(|e| e.into_api_error())?;
    state.metrics.incr_counter("overrides_created_total", &[]);
    refresh_overrides_gauge(state).await;
    Ok(response)
}

async fn delete_override(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Path(team): Path<String>) -> impl IntoResponse {
    let result = state.oncall.delete_override(&team).await;
    if result.is_ok() {
        refresh_overrides_gauge(&state).await;
    }
    match result {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_api_error().into_response_with_request_id(request_id.as_str()),
    }
}

async fn list_overrides(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>) -> impl IntoResponse {
    match list_overrides_inner(&state).await {
        Ok(overrides) => Json(overrides).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

/// Active (non-expired) overrides across every team. Reuses the same lazy
/// expiry check as `current`, so an expired override never appears here.
async fn list_overrides_inner(state: &AppState) -> ApiResult<Vec<OverrideResponse>> {
    let teams = state.oncall.teams().await.map_err(|e| e.into_api_error())?;
    let now = Utc::now();
    let mut overrides = Vec::new();
    for team in &teams {
        if let Some(over) = state.oncall.active_override(team, now).await.map_err(|e| e.into_api_error())? {
            overrides.push(OverrideResponse::from(over));
        }
    }
    Ok(overrides)
}

async fn escalate(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Json(body): Json<EscalateRequest>) -> impl IntoResponse {
    match escalate_inner(&state, &request_id, body).await {
        Ok(escalation) => (axum::http::StatusCode::CREATED, Json(escalation)).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn escalate_inner(state: &AppState, request_id: &RequestId, body: EscalateRequest) -> ApiResult<EscalationResponse> {
    let schedule = state.oncall.get_schedule(&body.team).await.map_err(|e| e.into_api_error())?;
    let schedule = schedule.ok_or_else(|| ApiError::NotFound("no schedule configured for team".into()))?;
    let CurrentOnCall { secondary, .. } = current_on_call(&schedule, Utc::now());

    let escalation = Escalation::new(body.team.clone(), body.incident_id, body.reason, secondary.clone());
    let response = EscalationResponse::from(escalation.clone());
    state.oncall.record_escalation(escalation).await.map_err(|e| e.into_api_error())?;
    state.metrics.incr_counter("oncall_escalations_total", &[("team", &body.team)]);

    if let Some(contact) = secondary {
        dispatch_escalation_notify(state, request_id, body.incident_id, contact);
    }

    Ok(response)
}

fn dispatch_escalation_notify(state: &AppState, request_id: &RequestId, incident_id: IncidentId, contact: Member) {
    let notifications = state.notifications.clone();
    let metrics = state.metrics.clone();
    let request_id = request_id.as_str().to_string();

    tokio::spawn(async move {
        let notify = NotifyRequest {
            incident_id: Some(incident_id),
            channel: "mock".to_string(),
            recipient: contact.email,
            message: format!("Escalated: incident {incident_id} needs secondary attention"),
            severity: None,
        };
        if let Err(e) = notifications.post_json::<NotifyRequest, NotifyResponse>("/api/v1/notify", &notify, &request_id).await {
            tracing::warn!(request_id = %request_id, error = %e, "escalation notify dispatch failed");
            metrics.incr_counter("notify_dispatch_failed_total", &[]);
        }
    });
}

async fn escalation_history(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Query(query): Query<HistoryQuery>) -> impl IntoResponse {
    match state.oncall.list_escalations(&query.team, query.limit.unwrap_or(0)).await {
        Ok(escalations) => Json(escalations.into_iter().map(EscalationResponse::from).collect::<Vec<_>>()).into_response(),
        Err(e) => e.into_api_error().into_response_with_request_id(request_id.as_str()),
    }
}

/// On-call audit history (rotation changes, overrides taking effect or
/// expiring) — a separate ring from the escalation log.
async fn oncall_history(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>, Query(query): Query<HistoryQuery>) -> impl IntoResponse {
    match state.oncall.list_history(&query.team, query.limit.unwrap_or(0)).await {
        Ok(events) => Json(events.into_iter().map(HistoryEventResponse::from).collect::<Vec<_>>()).into_response(),
        Err(e) => e.into_api_error().into_response_with_request_id(request_id.as_str()),
    }
}

async fn teams(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>) -> impl IntoResponse {
    match state.oncall.teams().await {
        Ok(teams) => Json(teams).into_response(),
        Err(e) => e.into_api_error().into_response_with_request_id(request_id.as_str()),
    }
}

async fn stats(State(state): State<Arc<AppState>>, Extension(request_id): Extension<RequestId>) -> impl IntoResponse {
    match stats_inner(&state).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response_with_request_id(request_id.as_str()),
    }
}

async fn stats_inner(state: &AppState) -> ApiResult<StatsResponse> {
    let teams = state.oncall.teams().await.map_err(|e| e.into_api_error())?;
    let now = Utc::now();
    let mut overrides_active = 0usize;
    for team in &teams {
        if state.oncall.active_override(team, now).await.map_err(|e| e.into_api_error())?.is_some() {
            overrides_active += 1;
        }
    }
    Ok(StatsResponse { teams: teams.len(), overrides_active })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", schema_version: PLATFORM_SCHEMA_VERSION })
}

async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let oncall_store = state.oncall.is_healthy().await;
    let response = ReadinessResponse { ready: oncall_store, oncall_store };
    if response.ready {
        Json(response).into_response()
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}

/// Records `oncall_requests_total{method,endpoint,status}` for every request.
/// Kept separate from `request_context_middleware` since it needs `AppState`
/// and that one is shared, state-free, across all four services.
async fn request_metrics_middleware(State(state): State<Arc<AppState>>, matched_path: Option<MatchedPath>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let endpoint = matched_path.map(|p| p.as_str().to_string()).unwrap_or_else(|| request.uri().path().to_string());
    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();
    state.metrics.incr_counter("oncall_requests_total", &[("method", &method), ("endpoint", &endpoint), ("status", &status)]);
    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/schedules", post(upsert_schedule).get(list_schedules))
        .route("/api/v1/schedules/:team", get(get_schedule).patch(set_members).delete(delete_schedule))
        .route("/api/v1/oncall/current", get(current))
        .route("/api/v1/oncall/override", post(create_override))
        .route("/api/v1/oncall/override/:team", delete(delete_override))
        .route("/api/v1/oncall/overrides", get(list_overrides))
        .route("/api/v1/escalate", post(escalate))
        .route("/api/v1/escalations", get(escalation_history))
        .route("/api/v1/oncall/history", get(oncall_history))
        .route("/api/v1/oncall/teams", get(teams))
        .route("/api/v1/oncall/stats", get(stats))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics))
        .layer(axum::middleware::from_fn_with_state(state.clone(), request_metrics_middleware))
        .layer(axum::middleware::from_fn(incident_core::middleware::request_context_middleware))
        .with_state(state)
}
