//! Append-only incident audit trail: notes and timeline events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ids::IncidentId;

/// Monotonic tie-breaker for events created within the same millisecond, so
/// that readers observe a single total order even when two appends race on
/// the system clock's resolution.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// A single append-only audit entry on an incident's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: u64,
    pub incident_id: IncidentId,
    pub event_type: EventType,
    pub actor: String,
    pub detail: Value,
    pub created_at: DateTime<Utc>,
    /// Insertion-order tie-breaker; not part of the public contract but
    /// used by stores to sort events created within the same millisecond.
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    AlertAttached,
    StatusChanged,
    Assigned,
    NoteAdded,
    Escalated,
}

impl TimelineEvent {
    pub fn new(
        incident_id: IncidentId,
        event_type: EventType,
        actor: impl Into<String>,
        detail: Value,
    ) -> Self {
        let sequence = next_sequence();
        Self {
            id: sequence,
            incident_id,
            event_type,
            actor: actor.into(),
            detail,
            created_at: Utc::now(),
            sequence,
        }
    }
}

/// An append-only note attached to an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentNote {
    pub incident_id: IncidentId,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
}

impl IncidentNote {
    pub fn new(incident_id: IncidentId, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            incident_id,
            author: author.into(),
            content: content.into(),
            created_at: Utc::now(),
            sequence: next_sequence(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequence_numbers_are_strictly_increasing() {
        let id = IncidentId::new();
        let a = TimelineEvent::new(id, EventType::Created, "system", json!({}));
        let b = TimelineEvent::new(id, EventType::StatusChanged, "system", json!({}));
        assert!(b.sequence > a.sequence);
    }
}
