//! On-call scheduling entities: schedules, overrides, and escalations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EscalationId, IncidentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationType {
    Daily,
    Weekly,
    Biweekly,
}

impl RotationType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "biweekly" => Some(Self::Biweekly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// A rotation roster for one team. `team` is the unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub team: String,
    pub rotation_type: RotationType,
    pub members: Vec<Member>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("schedule must retain at least one primary member")]
pub struct NoPrimaryError;

impl Schedule {
    pub fn new(team: String, rotation_type: RotationType, members: Vec<Member>) -> Result<Self, NoPrimaryError> {
        if !members.iter().any(|m| m.role == Role::Primary) {
            return Err(NoPrimaryError);
        }
        let now = Utc::now();
        Ok(Self {
            id: team.clone(),
            team,
            rotation_type,
            members,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn primaries(&self) -> Vec<&Member> {
        self.members.iter().filter(|m| m.role == Role::Primary).collect()
    }

    pub fn secondaries(&self) -> Vec<&Member> {
        self.members.iter().filter(|m| m.role == Role::Secondary).collect()
    }

    /// Replace the member roster, rejecting any change that would leave the
    /// schedule with no primary.
    pub fn set_members(&mut self, members: Vec<Member>) -> Result<(), NoPrimaryError> {
        if !members.iter().any(|m| m.role == Role::Primary) {
            return Err(NoPrimaryError);
        }
        self.members = members;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Apply a partial roster change: drop members named in `remove` (by
    /// name), then add or replace members in `add` (matched by name), then
    /// reject the result if it leaves no primary.
    pub fn apply_member_patch(&mut self, add: Vec<Member>, remove: &[String]) -> Result<(), NoPrimaryError> {
        let mut members: Vec<Member> = self.members.iter().filter(|m| !remove.contains(&m.name)).cloned().collect();
        for member in add {
            match members.iter_mut().find(|m| m.name == member.name) {
                Some(existing) => *existing = member,
                None => members.push(member),
            }
        }
        self.set_members(members)
    }
}

/// A time-bounded replacement of the currently scheduled primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Override {
    pub team: String,
    pub user_name: String,
    pub user_email: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Override {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A record of responsibility transferring from the primary to the
/// secondary (or beyond) for a given incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: EscalationId,
    pub team: String,
    pub incident_id: IncidentId,
    pub reason: Option<String>,
    pub escalated_to: Option<Member>,
    pub created_at: DateTime<Utc>,
}

impl Escalation {
    pub fn new(team: String, incident_id: IncidentId, reason: Option<String>, escalated_to: Option<Member>) -> Self {
        Self {
            id: EscalationId::new(),
            team,
            incident_id,
            reason,
            escalated_to,
            created_at: Utc::now(),
        }
    }
}

/// The kind of audit entry recorded in a team's on-call history, distinct
/// from the escalation log (escalations are their own bounded ring).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventKind {
    RotationChanged,
    OverrideSet,
    OverrideExpired,
}

/// An append-only audit entry for a team's on-call history ring (rotation
/// changes, overrides taking effect or expiring). Bounded and FIFO-evicted
/// like the escalation and notification logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub team: String,
    pub kind: HistoryEventKind,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEvent {
    pub fn new(team: String, kind: HistoryEventKind, detail: String) -> Self {
        Self { team, kind, detail, created_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, role: Role) -> Member {
        Member { name: name.into(), email: format!("{name}@example.com"), role }
    }

    #[test]
    fn schedule_requires_a_primary() {
        let members = vec![member("Frank", Role::Secondary)];
        assert!(Schedule::new("backend".into(), RotationType::Weekly, members).is_err());
    }

    #[test]
    fn removing_last_primary_is_rejected() {
        let mut schedule = Schedule::new(
            "backend".into(),
            RotationType::Weekly,
            vec![member("Ella", Role::Primary), member("Frank", Role::Secondary)],
        )
        .unwrap();
        let result = schedule.set_members(vec![member("Frank", Role::Secondary)]);
        assert!(result.is_err());
        assert_eq!(schedule.primaries().len(), 1);
    }

    #[test]
    fn override_expiry_is_exclusive() {
        let now = Utc::now();
        let over = Override {
            team: "platform".into(),
            user_name: "Dan".into(),
            user_email: "dan@example.com".into(),
            reason: None,
            created_at: now,
            expires_at: now,
        };
        assert!(!over.is_active(now));
    }
}
