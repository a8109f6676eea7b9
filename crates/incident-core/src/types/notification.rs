//! The `Notification` entity and delivery channel enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{IncidentId, NotificationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Mock,
    Email,
    Slack,
    Webhook,
}

impl Channel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mock" => Some(Self::Mock),
            "email" => Some(Self::Email),
            "slack" => Some(Self::Slack),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Email => "email",
            Self::Slack => "slack",
            Self::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub incident_id: IncidentId,
    pub channel: Channel,
    pub recipient: String,
    pub message: String,
    pub severity: Option<String>,
    pub metadata: Option<Value>,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        incident_id: IncidentId,
        channel: Channel,
        recipient: String,
        message: String,
        severity: Option<String>,
        metadata: Option<Value>,
        status: NotificationStatus,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            incident_id,
            channel,
            recipient,
            message,
            severity,
            metadata,
            status,
            created_at: Utc::now(),
        }
    }
}
