//! The `OnCallStore` abstraction: rotation rosters, time-bounded overrides,
//! and the escalation log. Postgres is not offered for this aggregate — the
//! platform treats on-call state as disposable configuration that is cheap
//! to reseed, so every deployment runs it in-memory (see `seed_default_schedules`).

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use incident_core::types::oncall::{Escalation, HistoryEvent, Member, Override, RotationType, Schedule};
use parking_lot::RwLock;

use crate::error::OnCallStoreError;

/// `PATCH /api/v1/schedules/{team}`: a partial roster/rotation update.
/// `add_members` adds or replaces (matched by name); `remove_members`
/// drops by name. Both apply in one step so the result is validated once.
#[derive(Debug, Clone, Default)]
pub struct SchedulePatch {
    pub rotation_type: Option<RotationType>,
    pub add_members: Vec<Member>,
    pub remove_members: Vec<String>,
}

#[async_trait]
pub trait OnCallStore: Send + Sync {
    async fn upsert_schedule(&self, schedule: Schedule) -> Result<(), OnCallStoreError>;
    async fn get_schedule(&self, team: &str) -> Result<Option<Schedule>, OnCallStoreError>;
    async fn list_schedules(&self) -> Result<Vec<Schedule>, OnCallStoreError>;
    async fn set_members(&self, team: &str, patch: SchedulePatch) -> Result<Schedule, OnCallStoreError>;
    async fn delete_schedule(&self, team: &str) -> Result<(), OnCallStoreError>;

    async fn set_override(&self, over: Override) -> Result<(), OnCallStoreError>;
    /// Returns the override for `team` if one exists and is still active at
    /// `now`. Lazily drops it from the store if it has expired.
    async fn active_override(&self, team: &str, now: DateTime<Utc>) -> Result<Option<Override>, OnCallStoreError>;
    async fn clear_expired_overrides(&self, now: DateTime<Utc>) -> Result<usize, OnCallStoreError>;
    async fn delete_override(&self, team: &str) -> Result<(), OnCallStoreError>;

    async fn record_escalation(&self, escalation: Escalation) -> Result<(), OnCallStoreError>;
    async fn list_escalations(&self, team: &str, limit: usize) -> Result<Vec<Escalation>, OnCallStoreError>;

    /// Record an on-call audit entry (rotation change, override taking
    /// effect or expiring) distinct from the escalation log.
    async fn record_history(&self, event: HistoryEvent) -> Result<(), OnCallStoreError>;
    async fn list_history(&self, team: &str, limit: usize) -> Result<Vec<HistoryEvent>, OnCallStoreError>;

    async fn teams(&self) -> Result<Vec<String>, OnCallStoreError>;
    async fn is_healthy(&self) -> bool;
}

pub struct InMemoryOnCallStore {
    schedules: RwLock<BTreeMap<String, Schedule>>,
    overrides: RwLock<BTreeMap<String, Override>>,
    escalations: RwLock<BTreeMap<String, VecDeque<Escalation>>>,
    history: RwLock<BTreeMap<String, VecDeque<HistoryEvent>>>,
    max_escalation_log_size: usize,
    max_history_size: usize,
}

impl InMemoryOnCallStore {
    pub fn new(max_escalation_log_size: usize, max_history_size: usize) -> Self {
        Self {
            schedules: RwLock::new(BTreeMap::new()),
            overrides: RwLock::new(BTreeMap::new()),
            escalations: RwLock::new(BTreeMap::new()),
            history: RwLock::new(BTreeMap::new()),
            max_escalation_log_size,
            max_history_size,
        }
    }

    /// Populate the seed rosters described in the deployment config when
    /// `seed_default_schedules` is enabled. Grounded in the fixed two-team
    /// sample rotation used by the platform's own smoke tests.
    pub fn seeded(max_escalation_log_size: usize, max_history_size: usize) -> Self {
        let store = Self::new(max_escalation_log_size, max_history_size);
        let now = Utc::now();
        for (team, rotation_type) in [("frontend-api", RotationType::Weekly), ("billing", RotationType::Daily)] {
            let members = vec![
                Member { name: "Primary On-Call".into(), email: format!("{team}-primary@example.com"), role: incident_core::types::oncall::Role::Primary },
                Member { name: "Secondary On-Call".into(), email: format!("{team}-secondary@example.com"), role: incident_core::types::oncall::Role::Secondary },
            ];
            if let Ok(schedule) = Schedule::new(team.to_string(), rotation_type, members) {
                let mut guard = store.schedules.write();
                guard.insert(team.to_string(), schedule);
            }
        }
        let _ = now;
        store
    }
}

#[async_trait]
impl OnCallStore for InMemoryOnCallStore {
    async fn upsert_schedule(&self, schedule: Schedule) -> Result<(), OnCallStoreError> {
        self.schedules.write().insert(schedule.team.clone(), schedule);
        Ok(())
    }

    async fn get_schedule(&self, team: &str) -> Result<Option<Schedule>, OnCallStoreError> {
        Ok(self.schedules.read().get(team).cloned())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, OnCallStoreError> {
        Ok(self.schedules.read().values().cloned().collect())
    }

    async fn set_members(&self, team: &str, patch: SchedulePatch) -> Result<Schedule, OnCallStoreError> {
        let mut guard = self.schedules.write();
        let schedule = guard.get_mut(team).ok_or(OnCallStoreError::ScheduleNotFound)?;
        if let Some(rotation_type) = patch.rotation_type {
            schedule.rotation_type = rotation_type;
        }
        schedule.apply_member_patch(patch.add_members, &patch.remove_members)?;
        Ok(schedule.clone())
    }

    async fn delete_schedule(&self, team: &str) -> Result<(), OnCallStoreError> {
        self.schedules.write().remove(team).ok_or(OnCallStoreError::ScheduleNotFound)?;
        Ok(())
    }

    async fn set_override(&self, over: Override) -> Result<(), OnCallStoreError> {
        let team = over.team.clone();
        let user_email = over.user_email.clone();
        self.overrides.write().insert(team.clone(), over);
        self.push_history(HistoryEvent::new(team, incident_core::types::oncall::HistoryEventKind::OverrideSet, format!("override set to {user_email}")));
        Ok(())
    }

    async fn active_override(&self, team: &str, now: DateTime<Utc>) -> Result<Option<Override>, OnCallStoreError> {
        let expired = {
            let mut guard = self.overrides.write();
            match guard.get(team) {
                Some(over) if over.is_active(now) => return Ok(Some(over.clone())),
                Some(over) => {
                    let user_email = over.user_email.clone();
                    guard.remove(team);
                    Some(user_email)
                }
                None => None,
            }
        };
        if let Some(user_email) = expired {
            self.push_history(HistoryEvent::new(
                team.to_string(),
                incident_core::types::oncall::HistoryEventKind::OverrideExpired,
                format!("override for {user_email} expired"),
            ));
        }
        Ok(None)
    }

    async fn clear_expired_overrides(&self, now: DateTime<Utc>) -> Result<usize, OnCallStoreError> {
        let mut guard = self.overrides.write();
        let before = guard.len();
        guard.retain(|_, over| over.is_active(now));
        Ok(before - guard.len())
    }

    async fn delete_override(&self, team: &str) -> Result<(), OnCallStoreError> {
        self.overrides.write().remove(team);
        Ok(())
    }

    async fn record_escalation(&self, escalation: Escalation) -> Result<(), OnCallStoreError> {
        let mut guard = self.escalations.write();
        let log = guard.entry(escalation.team.clone()).or_default();
        log.push_back(escalation);
        while log.len() > self.max_escalation_log_size {
            log.pop_front();
        }
        Ok(())
    }

    async fn list_escalations(&self, team: &str, limit: usize) -> Result<Vec<Escalation>, OnCallStoreError> {
        let guard = self.escalations.read();
        let Some(log) = guard.get(team) else {
            return Ok(Vec::new());
        };
        let limit = if limit == 0 { log.len() } else { limit };
        Ok(log.iter().rev().take(limit).cloned().collect())
    }

    async fn record_history(&self, event: HistoryEvent) -> Result<(), OnCallStoreError> {
        self.push_history(event);
        Ok(())
    }

    async fn list_history(&self, team: &str, limit: usize) -> Result<Vec<HistoryEvent>, OnCallStoreError> {
        let guard = self.history.read();
        let Some(log) = guard.get(team) else {
            return Ok(Vec::new());
        };
        let limit = if limit == 0 { log.len() } else { limit };
        Ok(log.iter().rev().take(limit).cloned().collect())
    }

    async fn teams(&self) -> Result<Vec<String>, OnCallStoreError> {
        Ok(self.schedules.read().keys().cloned().collect())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

impl InMemoryOnCallStore {
    fn push_history(&self, event: HistoryEvent) {
        let mut guard = self.history.write();
        let log = guard.entry(event.team.clone()).or_default();
        log.push_back(event);
        while log.len() > self.max_history_size {
            log.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_core::types::oncall::Role;

    fn member(name: &str, role: Role) -> Member {
        Member { name: name.into(), email: format!("{name}@example.com"), role }
    }

    #[tokio::test]
    async fn active_override_lazily_expires() {
        let store = InMemoryOnCallStore::new(10, 10);
        let now = Utc::now();
        store
            .set_override(Override {
                team: "frontend-api".into(),
                user_name: "Dan".into(),
                user_email: "dan@example.com".into(),
                reason: None,
                created_at: now,
                expires_at: now,
            })
            .await
            .unwrap();
        assert!(store.active_override("frontend-api", now + chrono::Duration::seconds(1)).await.unwrap().is_none());
        assert!(store.overrides.read().is_empty());
    }

    #[tokio::test]
    async fn escalation_log_is_bounded() {
        let store = InMemoryOnCallStore::new(2, 10);
        for _ in 0..5 {
            store
                .record_escalation(Escalation::new("frontend-api".into(), incident_core::IncidentId::new(), None, None))
                .await
                .unwrap();
        }
        let log = store.list_escalations("frontend-api", 0).await.unwrap();
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn set_members_rejects_losing_the_last_primary() {
        let store = InMemoryOnCallStore::new(10, 10);
        let schedule = Schedule::new("frontend-api".into(), RotationType::Weekly, vec![member("Ada", Role::Primary)]).unwrap();
        store.upsert_schedule(schedule).await.unwrap();
        let patch = SchedulePatch { rotation_type: None, add_members: vec![member("Ada", Role::Secondary)], remove_members: Vec::new() };
        let err = store.set_members("frontend-api", patch).await.unwrap_err();
        assert!(matches!(err, OnCallStoreError::NoPrimary(_)));
    }

    #[tokio::test]
    async fn set_members_applies_add_and_remove_incrementally() {
        let store = InMemoryOnCallStore::new(10, 10);
        let schedule = Schedule::new(
            "frontend-api".into(),
            RotationType::Weekly,
            vec![member("Ada", Role::Primary), member("Bob", Role::Secondary)],
        )
        .unwrap();
        store.upsert_schedule(schedule).await.unwrap();

        let patch = SchedulePatch {
            rotation_type: Some(RotationType::Biweekly),
            add_members: vec![member("Cleo", Role::Secondary)],
            remove_members: vec!["Bob".to_string()],
        };
        let updated = store.set_members("frontend-api", patch).await.unwrap();
        assert_eq!(updated.rotation_type, RotationType::Biweekly);
        let names: Vec<&str> = updated.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Cleo"]);
    }
}
