//! The `Alert` entity: an external observation ingested from a monitoring
//! source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::canonical::alert_fingerprint;
use crate::ids::{AlertId, IncidentId};

/// Severity as reported by the monitoring source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An external observation, immutable once ingested (it may later acquire
/// an `incident_id` via correlation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub service: String,
    pub severity: Severity,
    pub message: String,
    pub labels: BTreeMap<String, String>,
    pub source: Option<String>,
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
    pub incident_id: Option<IncidentId>,
    pub received_at: DateTime<Utc>,
}

impl Alert {
    /// Build a new alert from validated ingestion input. `timestamp`
    /// defaults to the receive time when the caller did not supply one.
    pub fn new(
        service: String,
        severity: Severity,
        message: String,
        labels: BTreeMap<String, String>,
        source: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        let received_at = Utc::now();
        let fingerprint = alert_fingerprint(&service, severity.as_str(), &message);
        Self {
            id: AlertId::new(),
            service,
            severity,
            message,
            labels,
            source,
            fingerprint,
            timestamp: timestamp.unwrap_or(received_at),
            incident_id: None,
            received_at,
        }
    }

    /// Attach this alert to an incident discovered via correlation or via
    /// the newly-created incident on a cache miss.
    pub fn attach_to(&mut self, incident_id: IncidentId) {
        self.incident_id = Some(incident_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_alert_defaults_timestamp_to_received_at() {
        let alert = Alert::new(
            "frontend-api".into(),
            Severity::High,
            "HTTP 5xx error rate > 10%".into(),
            BTreeMap::new(),
            None,
            None,
        );
        assert_eq!(alert.timestamp, alert.received_at);
        assert!(alert.incident_id.is_none());
    }

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!(Severity::parse("HIGH"), Some(Severity::High));
        assert_eq!(Severity::parse("bogus"), None);
    }
}
