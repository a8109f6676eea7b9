//! The `IncidentStore` abstraction: lifecycle state, notes, and the
//! append-only timeline, all mutated together under one critical section so
//! a `PATCH` can never observe or leave behind a half-applied state.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use incident_core::ids::{AlertId, IncidentId};
use incident_core::types::alert::Severity;
use incident_core::types::incident::{Incident, IncidentStatus};
use incident_core::types::timeline::{EventType, IncidentNote, TimelineEvent};
use parking_lot::RwLock;
use serde_json::json;

use crate::error::IncidentStoreError;

#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub service: Option<String>,
    pub severity: Option<Severity>,
    pub limit: usize,
    pub offset: usize,
}

impl IncidentFilter {
    fn matches(&self, incident: &Incident) -> bool {
        if let Some(status) = self.status {
            if incident.status != status {
                return false;
            }
        }
        if let Some(service) = &self.service {
            if &incident.service != service {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if incident.severity != severity {
                return false;
            }
        }
        true
    }
}

/// Requested change for `PATCH /api/v1/incidents/{id}`. `assigned_to` uses
/// double-`Option` so the caller can distinguish "leave untouched" from
/// "clear the assignee".
#[derive(Debug, Clone, Default)]
pub struct IncidentPatch {
    pub status: Option<IncidentStatus>,
    pub assigned_to: Option<Option<String>>,
    /// Note content to append in the same transaction as the status/assignee
    /// change. Authored by `actor`, same as the other two fields.
    pub note: Option<String>,
    pub actor: String,
}

#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub incident: Incident,
    pub timeline_events: Vec<TimelineEvent>,
}

/// Input to the atomic correlate-or-create decision: find the newest open
/// incident matching `(service, severity)` within the window, or create one.
#[derive(Debug, Clone)]
pub struct CorrelateParams {
    pub service: String,
    pub severity: Severity,
    pub since: DateTime<Utc>,
    pub title: String,
    pub alert_id: AlertId,
    pub actor: String,
}

#[derive(Debug, Clone)]
pub struct CorrelateOutcome {
    pub incident: Incident,
    pub created: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub open_count: u64,
    pub avg_mtta_seconds: Option<f64>,
    pub avg_mttr_seconds: Option<f64>,
}

#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn create(&self, incident: Incident, creation_event: TimelineEvent) -> Result<(), IncidentStoreError>;
    async fn get(&self, id: IncidentId) -> Result<Option<Incident>, IncidentStoreError>;
    async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, IncidentStoreError>;
    async fn find_correlation_candidate(
        &self,
        service: &str,
        severity: Severity,
        since: DateTime<Utc>,
    ) -> Result<Option<Incident>, IncidentStoreError>;
    async fn attach_alert(&self, id: IncidentId, event: TimelineEvent) -> Result<(), IncidentStoreError>;
    /// Atomically decide whether an incoming alert attaches to an existing
    /// incident or starts a new one. The find-then-write decision happens
    /// under one critical section (a held write lock in-memory, a
    /// transaction with a `(service, severity)` advisory lock plus
    /// `SELECT ... FOR UPDATE` in Postgres) so two alerts racing for the
    /// same `(service, severity)` window can never both create an incident.
    async fn correlate_or_create(&self, params: CorrelateParams) -> Result<CorrelateOutcome, IncidentStoreError>;
    async fn patch(&self, id: IncidentId, patch: IncidentPatch) -> Result<PatchOutcome, IncidentStoreError>;
    async fn add_note(&self, id: IncidentId, note: IncidentNote, event: TimelineEvent) -> Result<(), IncidentStoreError>;
    async fn notes(&self, id: IncidentId) -> Result<Vec<IncidentNote>, IncidentStoreError>;
    async fn timeline(&self, id: IncidentId) -> Result<Vec<TimelineEvent>, IncidentStoreError>;
    async fn stats_summary(&self) -> Result<StatsSummary, IncidentStoreError>;
    async fn is_healthy(&self) -> bool;
}

#[derive(Debug, Clone)]
struct IncidentRecord {
    incident: Incident,
    timeline: Vec<TimelineEvent>,
    notes: Vec<IncidentNote>,
}

#[derive(Debug, Default)]
pub struct InMemoryIncidentStore {
    incidents: RwLock<BTreeMap<IncidentId, IncidentRecord>>,
}

impl InMemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn create(&self, incident: Incident, creation_event: TimelineEvent) -> Result<(), IncidentStoreError> {
        let id = incident.id;
        let record = IncidentRecord {
            incident,
            timeline: vec![creation_event],
            notes: Vec::new(),
        };
        self.incidents.write().insert(id, record);
        Ok(())
    }

    async fn get(&self, id: IncidentId) -> Result<Option<Incident>, IncidentStoreError> {
        Ok(self.incidents.read().get(&id).map(|r| r.incident.clone()))
    }

    async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, IncidentStoreError> {
        let guard = self.incidents.read();
        let mut matched: Vec<Incident> = guard
            .values()
            .map(|r| &r.incident)
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let limit = if filter.limit == 0 { matched.len() } else { filter.limit };
        Ok(matched.into_iter().skip(filter.offset).take(limit).collect())
    }

    async fn find_correlation_candidate(
        &self,
        service: &str,
        severity: Severity,
        since: DateTime<Utc>,
    ) -> Result<Option<Incident>, IncidentStoreError> {
        let guard = self.incidents.read();
        let candidate = guard
            .values()
            .map(|r| &r.incident)
            .filter(|i| {
                i.service == service
                    && i.severity == severity
                    && i.status != IncidentStatus::Resolved
                    && i.created_at >= since
            })
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(candidate.cloned())
    }

    async fn attach_alert(&self, id: IncidentId, event: TimelineEvent) -> Result<(), IncidentStoreError> {
        let mut guard = self.incidents.write();
        let record = guard.get_mut(&id).ok_or(IncidentStoreError::NotFound)?;
        record.incident.record_alert_attached();
        record.timeline.push(event);
        Ok(())
    }

    async fn correlate_or_create(&self, params: CorrelateParams) -> Result<CorrelateOutcome, IncidentStoreError> {
        // One write guard held across the find-or-create decision: no other
        // caller can interleave a create for the same (service, severity).
        let mut guard = self.incidents.write();
        let candidate_id = guard
            .values()
            .map(|r| &r.incident)
            .filter(|i| i.service == params.service && i.severity == params.severity && i.status != IncidentStatus::Resolved && i.created_at >= params.since)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|i| i.id);

        if let Some(id) = candidate_id {
            let event = TimelineEvent::new(id, EventType::AlertAttached, &params.actor, json!({ "alert_id": params.alert_id.to_string() }));
            let record = guard.get_mut(&id).expect("candidate id came from this same guard");
            record.incident.record_alert_attached();
            record.timeline.push(event);
            return Ok(CorrelateOutcome { incident: record.incident.clone(), created: false });
        }

        let incident = Incident::new(params.title, params.service, params.severity, None);
        let event = TimelineEvent::new(incident.id, EventType::Created, &params.actor, json!({ "alert_id": params.alert_id.to_string() }));
        let id = incident.id;
        guard.insert(id, IncidentRecord { incident: incident.clone(), timeline: vec![event], notes: Vec::new() });
        Ok(CorrelateOutcome { incident, created: true })
    }

    async fn patch(&self, id: IncidentId, patch: IncidentPatch) -> Result<PatchOutcome, IncidentStoreError> {
        let mut guard = self.incidents.write();
        let record = guard.get_mut(&id).ok_or(IncidentStoreError::NotFound)?;
        let mut events = Vec::new();

        if let Some(next_status) = patch.status {
            let from = record.incident.status.as_str();
            record.incident.transition_to(next_status)?;
            if from != next_status.as_str() {
                events.push(TimelineEvent::new(
                    id,
                    EventType::StatusChanged,
                    patch.actor.clone(),
                    json!({ "from": from, "to": next_status.as_str() }),
                ));
            }
        }

        if let Some(assigned_to) = patch.assigned_to {
            record.incident.reassign(assigned_to.clone());
            events.push(TimelineEvent::new(
                id,
                EventType::Assigned,
                patch.actor.clone(),
                json!({ "assigned_to": assigned_to }),
            ));
        }

        if let Some(content) = patch.note {
            let note = IncidentNote::new(id, patch.actor.clone(), content.clone());
            events.push(TimelineEvent::new(id, EventType::NoteAdded, patch.actor.clone(), json!({ "content": content })));
            record.notes.push(note);
        }

        record.timeline.extend(events.clone());
        Ok(PatchOutcome {
            incident: record.incident.clone(),
            timeline_events: events,
        })
    }

    async fn add_note(&self, id: IncidentId, note: IncidentNote, event: TimelineEvent) -> Result<(), IncidentStoreError> {
        let mut guard = self.incidents.write();
        let record = guard.get_mut(&id).ok_or(IncidentStoreError::NotFound)?;
        record.notes.push(note);
        record.timeline.push(event);
        Ok(())
    }

    async fn notes(&self, id: IncidentId) -> Result<Vec<IncidentNote>, IncidentStoreError> {
        let guard = self.incidents.read();
        let record = guard.get(&id).ok_or(IncidentStoreError::NotFound)?;
        let mut notes = record.notes.clone();
        notes.sort_by_key(|n| n.sequence);
        Ok(notes)
    }

    async fn timeline(&self, id: IncidentId) -> Result<Vec<TimelineEvent>, IncidentStoreError> {
        let guard = self.incidents.read();
        let record = guard.get(&id).ok_or(IncidentStoreError::NotFound)?;
        let mut events = record.timeline.clone();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn stats_summary(&self) -> Result<StatsSummary, IncidentStoreError> {
        let guard = self.incidents.read();
        let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
        let mut mtta_total = 0i64;
        let mut mtta_count = 0i64;
        let mut mttr_total = 0i64;
        let mut mttr_count = 0i64;
        for record in guard.values() {
            *by_status.entry(record.incident.status.as_str().to_string()).or_insert(0) += 1;
            if let Some(mtta) = record.incident.mtta_seconds {
                mtta_total += mtta;
                mtta_count += 1;
            }
            if let Some(mttr) = record.incident.mttr_seconds {
                mttr_total += mttr;
                mttr_count += 1;
            }
        }
        let open_count = guard
            .values()
            .filter(|r| r.incident.status != IncidentStatus::Resolved)
            .count() as u64;
        Ok(StatsSummary {
            total: guard.len() as u64,
            by_status,
            open_count,
            avg_mtta_seconds: (mtta_count > 0).then(|| mtta_total as f64 / mtta_count as f64),
            avg_mttr_seconds: (mttr_count > 0).then(|| mttr_total as f64 / mttr_count as f64),
        })
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PostgresIncidentStore {
        pool: PgPool,
    }

    impl PostgresIncidentStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        fn row_to_incident(row: &sqlx::postgres::PgRow) -> Result<Incident, IncidentStoreError> {
            let severity_str: String = row.try_get("severity")?;
            let status_str: String = row.try_get("status")?;
            Ok(Incident {
                id: IncidentId::from_uuid(row.try_get("id")?),
                title: row.try_get("title")?,
                service: row.try_get("service")?,
                severity: Severity::parse(&severity_str).unwrap_or(Severity::Low),
                status: IncidentStatus::parse(&status_str).unwrap_or(IncidentStatus::Open),
                assigned_to: row.try_get("assigned_to")?,
                alert_count: row.try_get::<i32, _>("alert_count")? as u32,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
                acknowledged_at: row.try_get("acknowledged_at")?,
                resolved_at: row.try_get("resolved_at")?,
                mtta_seconds: row.try_get::<Option<i64>, _>("mtta_seconds")?,
                mttr_seconds: row.try_get::<Option<i64>, _>("mttr_seconds")?,
            })
        }

        async fn insert_timeline_event(
            executor: impl sqlx::PgExecutor<'_>,
            event: &TimelineEvent,
        ) -> Result<(), sqlx::Error> {
            sqlx::query(
                "INSERT INTO incident_timeline (incident_id, event_type, actor, detail, created_at, sequence)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(event.incident_id.as_uuid())
            .bind(format!("{:?}", event.event_type).to_lowercase())
            .bind(&event.actor)
            .bind(&event.detail)
            .bind(event.created_at)
            .bind(event.sequence as i64)
            .execute(executor)
            .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl IncidentStore for PostgresIncidentStore {
        async fn create(&self, incident: Incident, creation_event: TimelineEvent) -> Result<(), IncidentStoreError> {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                "INSERT INTO incidents (id, title, service, severity, status, assigned_to, alert_count, created_at, updated_at, acknowledged_at, resolved_at, mtta_seconds, mttr_seconds)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(incident.id.as_uuid())
            .bind(&incident.title)
            .bind(&incident.service)
            .bind(incident.severity.as_str())
            .bind(incident.status.as_str())
            .bind(&incident.assigned_to)
            .bind(incident.alert_count as i32)
            .bind(incident.created_at)
            .bind(incident.updated_at)
            .bind(incident.acknowledged_at)
            .bind(incident.resolved_at)
            .bind(incident.mtta_seconds)
            .bind(incident.mttr_seconds)
            .execute(&mut *tx)
            .await?;
            Self::insert_timeline_event(&mut *tx, &creation_event).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn get(&self, id: IncidentId) -> Result<Option<Incident>, IncidentStoreError> {
            let row = sqlx::query("SELECT * FROM incidents WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(Self::row_to_incident).transpose()
        }

        async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, IncidentStoreError> {
            let limit = if filter.limit == 0 { 100 } else { filter.limit } as i64;
            let rows = sqlx::query(
                "SELECT * FROM incidents
                 WHERE ($1::text IS NULL OR status = $1)
                   AND ($2::text IS NULL OR service = $2)
                   AND ($3::text IS NULL OR severity = $3)
                 ORDER BY created_at DESC, id DESC
                 LIMIT $4 OFFSET $5",
            )
            .bind(filter.status.map(|s| s.as_str().to_string()))
            .bind(&filter.service)
            .bind(filter.severity.map(|s| s.as_str().to_string()))
            .bind(limit)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(Self::row_to_incident).collect()
        }

        async fn find_correlation_candidate(
            &self,
            service: &str,
            severity: Severity,
            since: DateTime<Utc>,
        ) -> Result<Option<Incident>, IncidentStoreError> {
            let row = sqlx::query(
                "SELECT * FROM incidents
                 WHERE service = $1 AND severity = $2 AND status != 'resolved' AND created_at >= $3
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
            )
            .bind(service)
            .bind(severity.as_str())
            .bind(since)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(Self::row_to_incident).transpose()
        }

        async fn attach_alert(&self, id: IncidentId, event: TimelineEvent) -> Result<(), IncidentStoreError> {
            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                "UPDATE incidents SET alert_count = alert_count + 1, updated_at = now() WHERE id = $1",
            )
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(IncidentStoreError::NotFound);
            }
            Self::insert_timeline_event(&mut *tx, &event).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn correlate_or_create(&self, params: CorrelateParams) -> Result<CorrelateOutcome, IncidentStoreError> {
            let mut tx = self.pool.begin().await?;

            // Serialize every correlate-or-create decision for this
            // (service, severity) pair: the row being raced over doesn't
            // exist yet when the first alert in a burst arrives, so a row
            // lock alone can't prevent a second concurrent insert. The
            // session-scoped advisory lock (released at commit/rollback)
            // closes that gap.
            let lock_key = format!("{}:{}", params.service, params.severity.as_str());
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))").bind(&lock_key).execute(&mut *tx).await?;

            let row = sqlx::query(
                "SELECT * FROM incidents
                 WHERE service = $1 AND severity = $2 AND status != 'resolved' AND created_at >= $3
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1
                 FOR UPDATE",
            )
            .bind(&params.service)
            .bind(params.severity.as_str())
            .bind(params.since)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = row {
                let mut incident = Self::row_to_incident(&row)?;
                incident.record_alert_attached();
                sqlx::query("UPDATE incidents SET alert_count = $1, updated_at = $2 WHERE id = $3")
                    .bind(incident.alert_count as i32)
                    .bind(incident.updated_at)
                    .bind(incident.id.as_uuid())
                    .execute(&mut *tx)
                    .await?;
                let event = TimelineEvent::new(incident.id, EventType::AlertAttached, &params.actor, json!({ "alert_id": params.alert_id.to_string() }));
                Self::insert_timeline_event(&mut *tx, &event).await?;
                tx.commit().await?;
                return Ok(CorrelateOutcome { incident, created: false });
            }

            let incident = Incident::new(params.title, params.service, params.severity, None);
            let event = TimelineEvent::new(incident.id, EventType::Created, &params.actor, json!({ "alert_id": params.alert_id.to_string() }));
            sqlx::query(
                "INSERT INTO incidents (id, title, service, severity, status, assigned_to, alert_count, created_at, updated_at, acknowledged_at, resolved_at, mtta_seconds, mttr_seconds)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(incident.id.as_uuid())
            .bind(&incident.title)
            .bind(&incident.service)
            .bind(incident.severity.as_str())
            .bind(incident.status.as_str())
            .bind(&incident.assigned_to)
            .bind(incident.alert_count as i32)
            .bind(incident.created_at)
            .bind(incident.updated_at)
            .bind(incident.acknowledged_at)
            .bind(incident.resolved_at)
            .bind(incident.mtta_seconds)
            .bind(incident.mttr_seconds)
            .execute(&mut *tx)
            .await?;
            Self::insert_timeline_event(&mut *tx, &event).await?;
            tx.commit().await?;
            Ok(CorrelateOutcome { incident, created: true })
        }

        async fn patch(&self, id: IncidentId, patch: IncidentPatch) -> Result<PatchOutcome, IncidentStoreError> {
            let mut tx = self.pool.begin().await?;
            let row = sqlx::query("SELECT * FROM incidents WHERE id = $1 FOR UPDATE")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(IncidentStoreError::NotFound)?;
            let mut incident = Self::row_to_incident(&row)?;
            let mut events = Vec::new();

            if let Some(next_status) = patch.status {
                let from = incident.status.as_str();
                incident.transition_to(next_status)?;
                if from != next_status.as_str() {
                    events.push(TimelineEvent::new(
                        id,
                        EventType::StatusChanged,
                        patch.actor.clone(),
                        json!({ "from": from, "to": next_status.as_str() }),
                    ));
                }
            }
            if let Some(assigned_to) = patch.assigned_to {
                incident.reassign(assigned_to.clone());
                events.push(TimelineEvent::new(
                    id,
                    EventType::Assigned,
                    patch.actor.clone(),
                    json!({ "assigned_to": assigned_to }),
                ));
            }

            let note = patch.note.map(|content| {
                let note = IncidentNote::new(id, patch.actor.clone(), content.clone());
                events.push(TimelineEvent::new(id, EventType::NoteAdded, patch.actor.clone(), json!({ "content": content })));
                note
            });

            sqlx::query(
                "UPDATE incidents SET status = $1, assigned_to = $2, updated_at = $3, acknowledged_at = $4, resolved_at = $5, mtta_seconds = $6, mttr_seconds = $7
                 WHERE id = $8",
            )
            .bind(incident.status.as_str())
            .bind(&incident.assigned_to)
            .bind(incident.updated_at)
            .bind(incident.acknowledged_at)
            .bind(incident.resolved_at)
            .bind(incident.mtta_seconds)
            .bind(incident.mttr_seconds)
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;

            if let Some(note) = &note {
                sqlx::query(
                    "INSERT INTO incident_notes (incident_id, author, content, created_at, sequence) VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(note.incident_id.as_uuid())
                .bind(&note.author)
                .bind(&note.content)
                .bind(note.created_at)
                .bind(note.sequence as i64)
                .execute(&mut *tx)
                .await?;
            }

            for event in &events {
                Self::insert_timeline_event(&mut *tx, event).await?;
            }
            tx.commit().await?;
            Ok(PatchOutcome { incident, timeline_events: events })
        }

        async fn add_note(&self, id: IncidentId, note: IncidentNote, event: TimelineEvent) -> Result<(), IncidentStoreError> {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                "INSERT INTO incident_notes (incident_id, author, content, created_at, sequence) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(note.incident_id.as_uuid())
            .bind(&note.author)
            .bind(&note.content)
            .bind(note.created_at)
            .bind(note.sequence as i64)
            .execute(&mut *tx)
            .await?;
            Self::insert_timeline_event(&mut *tx, &event).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn notes(&self, id: IncidentId) -> Result<Vec<IncidentNote>, IncidentStoreError> {
            let rows = sqlx::query("SELECT * FROM incident_notes WHERE incident_id = $1 ORDER BY sequence ASC")
                .bind(id.as_uuid())
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter()
                .map(|row| {
                    Ok(IncidentNote {
                        incident_id: IncidentId::from_uuid(row.try_get("incident_id")?),
                        author: row.try_get("author")?,
                        content: row.try_get("content")?,
                        created_at: row.try_get("created_at")?,
                        sequence: row.try_get::<i64, _>("sequence")? as u64,
                    })
                })
                .collect()
        }

        async fn timeline(&self, id: IncidentId) -> Result<Vec<TimelineEvent>, IncidentStoreError> {
            let rows = sqlx::query("SELECT * FROM incident_timeline WHERE incident_id = $1 ORDER BY sequence ASC")
                .bind(id.as_uuid())
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter()
                .map(|row| {
                    let event_type_str: String = row.try_get("event_type")?;
                    let event_type = match event_type_str.as_str() {
                        "created" => EventType::Created,
                        "alertattached" | "alert_attached" => EventType::AlertAttached,
                        "statuschanged" | "status_changed" => EventType::StatusChanged,
                        "assigned" => EventType::Assigned,
                        "noteadded" | "note_added" => EventType::NoteAdded,
                        _ => EventType::Escalated,
                    };
                    Ok(TimelineEvent {
                        id: row.try_get::<i64, _>("sequence")? as u64,
                        incident_id: IncidentId::from_uuid(row.try_get("incident_id")?),
                        event_type,
                        actor: row.try_get("actor")?,
                        detail: row.try_get("detail")?,
                        created_at: row.try_get("created_at")?,
                        sequence: row.try_get::<i64, _>("sequence")? as u64,
                    })
                })
                .collect()
        }

        async fn stats_summary(&self) -> Result<StatsSummary, IncidentStoreError> {
            let rows = sqlx::query(
                "SELECT status, count(*) as cnt, avg(mtta_seconds) as avg_mtta, avg(mttr_seconds) as avg_mttr
                 FROM incidents GROUP BY status",
            )
            .fetch_all(&self.pool)
            .await?;
            let mut by_status = BTreeMap::new();
            let mut total = 0u64;
            let mut open_count = 0u64;
            let mut avg_mtta_seconds = None;
            let mut avg_mttr_seconds = None;
            for row in &rows {
                let status: String = row.try_get("status")?;
                let count: i64 = row.try_get("cnt")?;
                total += count as u64;
                if status != "resolved" {
                    open_count += count as u64;
                }
                if let Ok(Some(avg)) = row.try_get::<Option<f64>, _>("avg_mtta") {
                    avg_mtta_seconds = Some(avg);
                }
                if let Ok(Some(avg)) = row.try_get::<Option<f64>, _>("avg_mttr") {
                    avg_mttr_seconds = Some(avg);
                }
                by_status.insert(status, count as u64);
            }
            Ok(StatsSummary { total, by_status, open_count, avg_mtta_seconds, avg_mttr_seconds })
        }

        async fn is_healthy(&self) -> bool {
            sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_core::types::incident::IncidentStatus;

    fn fresh_incident() -> (Incident, TimelineEvent) {
        let incident = Incident::new("svc down".into(), "frontend-api".into(), Severity::High, None);
        let event = TimelineEvent::new(incident.id, EventType::Created, "system", json!({}));
        (incident, event)
    }

    #[tokio::test]
    async fn patch_transition_emits_a_single_status_changed_event() {
        let store = InMemoryIncidentStore::new();
        let (incident, event) = fresh_incident();
        let id = incident.id;
        store.create(incident, event).await.unwrap();

        let outcome = store
            .patch(id, IncidentPatch { status: Some(IncidentStatus::Acknowledged), assigned_to: None, note: None, actor: "alice".into() })
            .await
            .unwrap();
        assert_eq!(outcome.timeline_events.len(), 1);
        assert_eq!(outcome.incident.status, IncidentStatus::Acknowledged);

        let timeline = store.timeline(id).await.unwrap();
        assert_eq!(timeline.len(), 2);
    }

    #[tokio::test]
    async fn patch_same_status_emits_no_event() {
        let store = InMemoryIncidentStore::new();
        let (incident, event) = fresh_incident();
        let id = incident.id;
        store.create(incident, event).await.unwrap();

        let outcome = store
            .patch(id, IncidentPatch { status: Some(IncidentStatus::Open), assigned_to: None, note: None, actor: "alice".into() })
            .await
            .unwrap();
        assert!(outcome.timeline_events.is_empty());
    }

    #[tokio::test]
    async fn patch_rejects_illegal_transition_and_leaves_state_untouched() {
        let store = InMemoryIncidentStore::new();
        let (incident, event) = fresh_incident();
        let id = incident.id;
        store.create(incident, event).await.unwrap();
        store
            .patch(id, IncidentPatch { status: Some(IncidentStatus::Resolved), assigned_to: None, note: None, actor: "alice".into() })
            .await
            .unwrap();

        let err = store
            .patch(id, IncidentPatch { status: Some(IncidentStatus::Open), assigned_to: None, note: None, actor: "alice".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, IncidentStoreError::IllegalTransition(_)));
        let current = store.get(id).await.unwrap().unwrap();
        assert_eq!(current.status, IncidentStatus::Resolved);
    }

    #[tokio::test]
    async fn correlation_candidate_picks_newest_open_match() {
        let store = InMemoryIncidentStore::new();
        let since = Utc::now() - chrono::Duration::minutes(10);
        let (older, older_event) = fresh_incident();
        store.create(older, older_event).await.unwrap();
        let (newer, newer_event) = fresh_incident();
        let newer_id = newer.id;
        store.create(newer, newer_event).await.unwrap();

        let candidate = store
            .find_correlation_candidate("frontend-api", Severity::High, since)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.id, newer_id);
    }

    #[tokio::test]
    async fn resolved_incidents_are_not_correlation_candidates() {
        let store = InMemoryIncidentStore::new();
        let since = Utc::now() - chrono::Duration::minutes(10);
        let (incident, event) = fresh_incident();
        let id = incident.id;
        store.create(incident, event).await.unwrap();
        store
            .patch(id, IncidentPatch { status: Some(IncidentStatus::Resolved), assigned_to: None, note: None, actor: "alice".into() })
            .await
            .unwrap();

        let candidate = store.find_correlation_candidate("frontend-api", Severity::High, since).await.unwrap();
        assert!(candidate.is_none());
    }

    fn correlate_params(service: &str) -> CorrelateParams {
        CorrelateParams {
            service: service.to_string(),
            severity: Severity::High,
            since: Utc::now() - chrono::Duration::minutes(10),
            title: "svc down".into(),
            alert_id: incident_core::ids::AlertId::new(),
            actor: "alert-ingestion".into(),
        }
    }

    #[tokio::test]
    async fn correlate_or_create_creates_once_then_attaches() {
        let store = InMemoryIncidentStore::new();

        let first = store.correlate_or_create(correlate_params("frontend-api")).await.unwrap();
        assert!(first.created);

        let second = store.correlate_or_create(correlate_params("frontend-api")).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.incident.id, first.incident.id);
        assert_eq!(second.incident.alert_count, 2);
    }

    #[tokio::test]
    async fn correlate_or_create_never_attaches_to_a_resolved_incident() {
        let store = InMemoryIncidentStore::new();
        let first = store.correlate_or_create(correlate_params("billing")).await.unwrap();
        store
            .patch(first.incident.id, IncidentPatch { status: Some(IncidentStatus::Resolved), assigned_to: None, note: None, actor: "alice".into() })
            .await
            .unwrap();

        let second = store.correlate_or_create(correlate_params("billing")).await.unwrap();
        assert!(second.created);
        assert_ne!(second.incident.id, first.incident.id);
    }

    #[tokio::test]
    async fn patch_applies_status_and_note_atomically() {
        let store = InMemoryIncidentStore::new();
        let (incident, event) = fresh_incident();
        let id = incident.id;
        store.create(incident, event).await.unwrap();

        let outcome = store
            .patch(
                id,
                IncidentPatch {
                    status: Some(IncidentStatus::Acknowledged),
                    assigned_to: None,
                    note: Some("paging secondary".into()),
                    actor: "alice".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.incident.status, IncidentStatus::Acknowledged);
        assert_eq!(outcome.timeline_events.len(), 2);
        assert!(outcome.timeline_events.iter().any(|e| matches!(e.event_type, EventType::StatusChanged)));
        assert!(outcome.timeline_events.iter().any(|e| matches!(e.event_type, EventType::NoteAdded)));

        let notes = store.notes(id).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "paging secondary");
        assert_eq!(notes[0].author, "alice");

        let timeline = store.timeline(id).await.unwrap();
        assert_eq!(timeline.len(), 3);
    }
}
