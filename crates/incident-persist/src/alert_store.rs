//! The `AlertStore` abstraction: one implementation per backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use incident_core::types::alert::{Alert, Severity};
use incident_core::ids::{AlertId, IncidentId};
use parking_lot::RwLock;

use crate::error::AlertStoreError;

/// Query parameters accepted by `GET /api/v1/alerts`.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub service: Option<String>,
    pub severity: Option<Severity>,
    pub unattached_only: bool,
    pub limit: usize,
    pub offset: usize,
}

impl AlertFilter {
    fn matches(&self, alert: &Alert) -> bool {
        if let Some(service) = &self.service {
            if &alert.service != service {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if alert.severity != severity {
                return false;
            }
        }
        if self.unattached_only && alert.incident_id.is_some() {
            return false;
        }
        true
    }
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert(&self, alert: Alert) -> Result<(), AlertStoreError>;
    async fn get(&self, id: AlertId) -> Result<Option<Alert>, AlertStoreError>;
    async fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, AlertStoreError>;
    async fn attach_incident(&self, id: AlertId, incident_id: IncidentId) -> Result<(), AlertStoreError>;
    async fn is_healthy(&self) -> bool;
}

/// `BTreeMap`-backed store. Iteration order follows `AlertId`'s `Ord` impl
/// (random UUID order), so callers that need chronological order sort on
/// `received_at` explicitly — see [`InMemoryAlertStore::list`].
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<BTreeMap<AlertId, Alert>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn insert(&self, alert: Alert) -> Result<(), AlertStoreError> {
        self.alerts.write().insert(alert.id, alert);
        Ok(())
    }

    async fn get(&self, id: AlertId) -> Result<Option<Alert>, AlertStoreError> {
        Ok(self.alerts.read().get(&id).cloned())
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, AlertStoreError> {
        let guard = self.alerts.read();
        let mut matched: Vec<Alert> = guard.values().filter(|a| filter.matches(a)).cloned().collect();
        matched.sort_by(|a, b| b.received_at.cmp(&a.received_at).then(a.id.cmp(&b.id)));
        let limit = if filter.limit == 0 { matched.len() } else { filter.limit };
        Ok(matched.into_iter().skip(filter.offset).take(limit).collect())
    }

    async fn attach_incident(&self, id: AlertId, incident_id: IncidentId) -> Result<(), AlertStoreError> {
        let mut guard = self.alerts.write();
        let alert = guard.get_mut(&id).ok_or(AlertStoreError::NotFound)?;
        alert.attach_to(incident_id);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PostgresAlertStore {
        pool: PgPool,
    }

    impl PostgresAlertStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        fn row_to_alert(row: &sqlx::postgres::PgRow) -> Result<Alert, AlertStoreError> {
            let labels_json: serde_json::Value = row.try_get("labels").map_err(AlertStoreError::from_sqlx)?;
            let labels = labels_json
                .as_object()
                .map(|obj| {
                    obj.iter()
                        .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                        .collect()
                })
                .unwrap_or_default();
            let severity_str: String = row.try_get("severity").map_err(AlertStoreError::from_sqlx)?;
            Ok(Alert {
                id: AlertId::from_uuid(row.try_get("id").map_err(AlertStoreError::from_sqlx)?),
                service: row.try_get("service").map_err(AlertStoreError::from_sqlx)?,
                severity: Severity::parse(&severity_str).unwrap_or(Severity::Low),
                message: row.try_get("message").map_err(AlertStoreError::from_sqlx)?,
                labels,
                source: row.try_get("source").map_err(AlertStoreError::from_sqlx)?,
                fingerprint: row.try_get("fingerprint").map_err(AlertStoreError::from_sqlx)?,
                timestamp: row.try_get("timestamp").map_err(AlertStoreError::from_sqlx)?,
                incident_id: row
                    .try_get::<Option<uuid::Uuid>, _>("incident_id")
                    .map_err(AlertStoreError::from_sqlx)?
                    .map(IncidentId::from_uuid),
                received_at: row.try_get("received_at").map_err(AlertStoreError::from_sqlx)?,
            })
        }
    }

    impl AlertStoreError {
        fn from_sqlx(e: sqlx::Error) -> Self {
            Self::Backend(e.to_string())
        }
    }

    #[async_trait]
    impl AlertStore for PostgresAlertStore {
        async fn insert(&self, alert: Alert) -> Result<(), AlertStoreError> {
            let labels_json = serde_json::to_value(&alert.labels).unwrap_or_default();
            sqlx::query(
                "INSERT INTO alerts (id, service, severity, message, labels, source, fingerprint, timestamp, incident_id, received_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(alert.id.as_uuid())
            .bind(&alert.service)
            .bind(alert.severity.as_str())
            .bind(&alert.message)
            .bind(labels_json)
            .bind(&alert.source)
            .bind(&alert.fingerprint)
            .bind(alert.timestamp)
            .bind(alert.incident_id.map(|i| i.as_uuid()))
            .bind(alert.received_at)
            .execute(&self.pool)
            .await
            .map_err(AlertStoreError::from_sqlx)?;
            Ok(())
        }

        async fn get(&self, id: AlertId) -> Result<Option<Alert>, AlertStoreError> {
            let row = sqlx::query("SELECT * FROM alerts WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(AlertStoreError::from_sqlx)?;
            row.as_ref().map(Self::row_to_alert).transpose()
        }

        async fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, AlertStoreError> {
            let limit = if filter.limit == 0 { 100 } else { filter.limit } as i64;
            let rows = sqlx::query(
                "SELECT * FROM alerts
                 WHERE ($1::text IS NULL OR service = $1)
                   AND ($2::text IS NULL OR severity = $2)
                   AND (NOT $3 OR incident_id IS NULL)
                 ORDER BY received_at DESC, id DESC
                 LIMIT $4 OFFSET $5",
            )
            .bind(&filter.service)
            .bind(filter.severity.map(|s| s.as_str().to_string()))
            .bind(filter.unattached_only)
            .bind(limit)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(AlertStoreError::from_sqlx)?;
            rows.iter().map(Self::row_to_alert).collect()
        }

        async fn attach_incident(&self, id: AlertId, incident_id: IncidentId) -> Result<(), AlertStoreError> {
            let result = sqlx::query("UPDATE alerts SET incident_id = $1 WHERE id = $2")
                .bind(incident_id.as_uuid())
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(AlertStoreError::from_sqlx)?;
            if result.rows_affected() == 0 {
                return Err(AlertStoreError::NotFound);
            }
            Ok(())
        }

        async fn is_healthy(&self) -> bool {
            sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn alert(service: &str, severity: Severity) -> Alert {
        Alert::new(service.into(), severity, "boom".into(), Map::new(), None, None)
    }

    #[tokio::test]
    async fn insert_and_get_round_trips() {
        let store = InMemoryAlertStore::new();
        let a = alert("frontend-api", Severity::High);
        let id = a.id;
        store.insert(a).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn list_filters_by_service_and_severity() {
        let store = InMemoryAlertStore::new();
        store.insert(alert("frontend-api", Severity::High)).await.unwrap();
        store.insert(alert("billing", Severity::Low)).await.unwrap();
        let filter = AlertFilter {
            service: Some("frontend-api".into()),
            ..Default::default()
        };
        let results = store.list(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].service, "frontend-api");
    }

    #[tokio::test]
    async fn attach_incident_updates_existing_alert() {
        let store = InMemoryAlertStore::new();
        let a = alert("frontend-api", Severity::High);
        let id = a.id;
        store.insert(a).await.unwrap();
        let incident_id = IncidentId::new();
        store.attach_incident(id, incident_id).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.incident_id, Some(incident_id));
    }

    #[tokio::test]
    async fn attach_incident_on_missing_alert_is_not_found() {
        let store = InMemoryAlertStore::new();
        let err = store.attach_incident(AlertId::new(), IncidentId::new()).await.unwrap_err();
        assert!(matches!(err, AlertStoreError::NotFound));
    }
}
