//! The `NotificationStore` abstraction: a bounded delivery log, kept
//! in-memory in every deployment (notifications are re-derivable from the
//! incident timeline and are not considered durable state).

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use incident_core::ids::{IncidentId, NotificationId};
use incident_core::types::notification::{Channel, Notification, NotificationStatus};
use parking_lot::RwLock;

use crate::error::NotificationStoreError;

#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub incident_id: Option<IncidentId>,
    pub channel: Option<Channel>,
    pub status: Option<NotificationStatus>,
    pub recipient: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NotificationStatsSummary {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
    pub by_channel: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: Notification) -> Result<(), NotificationStoreError>;
    async fn get(&self, id: NotificationId) -> Result<Option<Notification>, NotificationStoreError>;
    async fn list(&self, filter: &NotificationFilter) -> Result<Vec<Notification>, NotificationStoreError>;
    async fn stats_summary(&self) -> Result<NotificationStatsSummary, NotificationStoreError>;
    async fn is_healthy(&self) -> bool;
}

pub struct InMemoryNotificationStore {
    log: RwLock<VecDeque<Notification>>,
    max_log_size: usize,
}

impl InMemoryNotificationStore {
    pub fn new(max_log_size: usize) -> Self {
        Self {
            log: RwLock::new(VecDeque::new()),
            max_log_size,
        }
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, notification: Notification) -> Result<(), NotificationStoreError> {
        let mut guard = self.log.write();
        guard.push_back(notification);
        while guard.len() > self.max_log_size {
            guard.pop_front();
        }
        Ok(())
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>, NotificationStoreError> {
        Ok(self.log.read().iter().find(|n| n.id == id).cloned())
    }

    async fn list(&self, filter: &NotificationFilter) -> Result<Vec<Notification>, NotificationStoreError> {
        let guard = self.log.read();
        let matched: Vec<Notification> = guard
            .iter()
            .rev()
            .filter(|n| filter.incident_id.map_or(true, |id| n.incident_id == id))
            .filter(|n| filter.channel.map_or(true, |c| n.channel == c))
            .filter(|n| filter.status.map_or(true, |s| n.status == s))
            .filter(|n| filter.recipient.as_deref().map_or(true, |r| n.recipient == r))
            .cloned()
            .collect();
        let limit = if filter.limit == 0 { matched.len() } else { filter.limit };
        Ok(matched.into_iter().take(limit).collect())
    }

    async fn stats_summary(&self) -> Result<NotificationStatsSummary, NotificationStoreError> {
        let guard = self.log.read();
        let mut summary = NotificationStatsSummary::default();
        for notification in guard.iter() {
            summary.total += 1;
            match notification.status {
                incident_core::types::notification::NotificationStatus::Sent => summary.sent += 1,
                incident_core::types::notification::NotificationStatus::Failed => summary.failed += 1,
            }
            *summary.by_channel.entry(notification.channel.as_str().to_string()).or_insert(0) += 1;
            if let Some(severity) = &notification.severity {
                *summary.by_severity.entry(severity.clone()).or_insert(0) += 1;
            }
        }
        Ok(summary)
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(incident_id: IncidentId, channel: Channel) -> Notification {
        Notification::new(incident_id, channel, "oncall@example.com".into(), "hi".into(), None, None, NotificationStatus::Sent)
    }

    fn notification_with(incident_id: IncidentId, channel: Channel, recipient: &str, severity: Option<&str>, status: NotificationStatus) -> Notification {
        Notification::new(incident_id, channel, recipient.to_string(), "hi".into(), severity.map(str::to_string), None, status)
    }

    #[tokio::test]
    async fn log_is_bounded_and_drops_oldest() {
        let store = InMemoryNotificationStore::new(2);
        let incident_id = IncidentId::new();
        let first = notification(incident_id, Channel::Mock);
        let first_id = first.id;
        store.insert(first).await.unwrap();
        store.insert(notification(incident_id, Channel::Mock)).await.unwrap();
        store.insert(notification(incident_id, Channel::Mock)).await.unwrap();

        assert!(store.get(first_id).await.unwrap().is_none());
        assert_eq!(store.list(&NotificationFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_filters_by_channel() {
        let store = InMemoryNotificationStore::new(10);
        let incident_id = IncidentId::new();
        store.insert(notification(incident_id, Channel::Email)).await.unwrap();
        store.insert(notification(incident_id, Channel::Slack)).await.unwrap();

        let filter = NotificationFilter { channel: Some(Channel::Slack), ..Default::default() };
        let results = store.list(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].channel, Channel::Slack);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_recipient() {
        let store = InMemoryNotificationStore::new(10);
        let incident_id = IncidentId::new();
        store.insert(notification_with(incident_id, Channel::Email, "a@example.com", None, NotificationStatus::Sent)).await.unwrap();
        store.insert(notification_with(incident_id, Channel::Email, "b@example.com", None, NotificationStatus::Failed)).await.unwrap();

        let by_status = store.list(&NotificationFilter { status: Some(NotificationStatus::Failed), ..Default::default() }).await.unwrap();
        assert_eq!(by_status.len(), 1);
        assert_eq!(by_status[0].recipient, "b@example.com");

        let by_recipient = store.list(&NotificationFilter { recipient: Some("a@example.com".into()), ..Default::default() }).await.unwrap();
        assert_eq!(by_recipient.len(), 1);
        assert_eq!(by_recipient[0].status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn stats_summary_breaks_down_by_severity() {
        let store = InMemoryNotificationStore::new(10);
        let incident_id = IncidentId::new();
        store.insert(notification_with(incident_id, Channel::Email, "a@example.com", Some("critical"), NotificationStatus::Sent)).await.unwrap();
        store.insert(notification_with(incident_id, Channel::Email, "b@example.com", Some("critical"), NotificationStatus::Sent)).await.unwrap();
        store.insert(notification_with(incident_id, Channel::Email, "c@example.com", Some("low"), NotificationStatus::Failed)).await.unwrap();

        let summary = store.stats_summary().await.unwrap();
        assert_eq!(summary.by_severity.get("critical"), Some(&2));
        assert_eq!(summary.by_severity.get("low"), Some(&1));
    }
}
