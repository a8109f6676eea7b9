//! The `Incident` entity and its lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::Severity;
use crate::ids::IncidentId;

/// Lifecycle status. Transitions are validated by [`Incident::transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    InProgress,
    Resolved,
}

impl IncidentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "acknowledged" => Some(Self::Acknowledged),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
        }
    }

    /// Whether `self -> next` is an allowed transition.
    ///
    /// `open -> {acknowledged, in_progress, resolved}`
    /// `acknowledged -> {in_progress, resolved}`
    /// `in_progress -> {resolved}`
    /// `resolved` is terminal.
    pub fn can_transition_to(&self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        matches!(
            (self, next),
            (Open, Acknowledged) | (Open, InProgress) | (Open, Resolved)
                | (Acknowledged, InProgress) | (Acknowledged, Resolved)
                | (InProgress, Resolved)
        )
    }
}

/// A correlation of one or more alerts, tracked through its SRE lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub title: String,
    pub service: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub assigned_to: Option<String>,
    pub alert_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub mtta_seconds: Option<i64>,
    pub mttr_seconds: Option<i64>,
}

/// Why a requested transition was rejected.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot transition incident from {from} to {to}")]
pub struct IllegalTransition {
    pub from: &'static str,
    pub to: &'static str,
}

impl Incident {
    pub fn new(title: String, service: String, severity: Severity, assigned_to: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: IncidentId::new(),
            title,
            service,
            severity,
            status: IncidentStatus::Open,
            assigned_to,
            alert_count: 1,
            created_at: now,
            updated_at: now,
            acknowledged_at: None,
            resolved_at: None,
            mtta_seconds: None,
            mttr_seconds: None,
        }
    }

    /// Apply a validated status transition, deriving `acknowledged_at`,
    /// `resolved_at`, `mtta_seconds`, and `mttr_seconds` per spec:
    /// - entering `acknowledged`/`in_progress` for the first time stamps
    ///   `acknowledged_at` and computes `mtta_seconds`;
    /// - entering `resolved` stamps `resolved_at`, computes `mttr_seconds`,
    ///   and if never acknowledged, implicitly acknowledges at the same
    ///   instant (`acknowledged_at := resolved_at`, `mtta := mttr`).
    pub fn transition_to(&mut self, next: IncidentStatus) -> Result<(), IllegalTransition> {
        if self.status == next {
            // Idempotent no-op: supplying the current status changes nothing.
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }

        let now = Utc::now();

        if matches!(next, IncidentStatus::Acknowledged | IncidentStatus::InProgress)
            && self.acknowledged_at.is_none()
        {
            self.acknowledged_at = Some(now);
            self.mtta_seconds = Some((now - self.created_at).num_seconds());
        }

        if next == IncidentStatus::Resolved {
            self.resolved_at = Some(now);
            self.mttr_seconds = Some((now - self.created_at).num_seconds());
            if self.acknowledged_at.is_none() {
                self.acknowledged_at = Some(now);
                self.mtta_seconds = self.mttr_seconds;
            }
        }

        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn reassign(&mut self, assigned_to: Option<String>) {
        self.assigned_to = assigned_to;
        self.updated_at = Utc::now();
    }

    pub fn record_alert_attached(&mut self) {
        self.alert_count += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Incident {
        Incident::new("svc down".into(), "frontend-api".into(), Severity::High, None)
    }

    #[test]
    fn resolve_without_ack_implies_ack_at_same_instant() {
        let mut incident = fresh();
        incident.transition_to(IncidentStatus::Resolved).unwrap();
        assert_eq!(incident.acknowledged_at, incident.resolved_at);
        assert_eq!(incident.mtta_seconds, incident.mttr_seconds);
    }

    #[test]
    fn resolved_is_terminal() {
        let mut incident = fresh();
        incident.transition_to(IncidentStatus::Resolved).unwrap();
        let err = incident.transition_to(IncidentStatus::Open).unwrap_err();
        assert_eq!(err.from, "resolved");
        assert_eq!(incident.status, IncidentStatus::Resolved);
    }

    #[test]
    fn same_status_is_a_no_op() {
        let mut incident = fresh();
        let before = incident.updated_at;
        incident.transition_to(IncidentStatus::Open).unwrap();
        assert_eq!(incident.updated_at, before);
        assert!(incident.acknowledged_at.is_none());
    }

    #[test]
    fn acknowledge_then_resolve_keeps_distinct_timestamps() {
        let mut incident = fresh();
        incident.transition_to(IncidentStatus::Acknowledged).unwrap();
        let ack_time = incident.acknowledged_at.unwrap();
        incident.transition_to(IncidentStatus::Resolved).unwrap();
        assert_eq!(incident.acknowledged_at.unwrap(), ack_time);
        assert!(incident.resolved_at.unwrap() >= ack_time);
    }

    #[test]
    fn in_progress_cannot_skip_back_to_open() {
        let mut incident = fresh();
        incident.transition_to(IncidentStatus::InProgress).unwrap();
        assert!(incident.transition_to(IncidentStatus::Open).is_err());
    }
}
