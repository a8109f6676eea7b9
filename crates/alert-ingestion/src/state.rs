//! Shared service state for Alert Ingestion.
//!
//! Holds the service's own [`AlertStore`] plus a fallback [`IncidentStore`]
//! used only when the Incident Management service is unreachable after the
//! retry budget is exhausted (see `routes::ingest_alert`). Both are trait
//! objects rather than a single generic parameter (contrast
//! `store/postgres.rs`'s compile-time-selected backend in the kernel this
//! workspace grew from) because the memory/Postgres choice here is a
//! runtime decision driven by `DATABASE_URL`, not a per-build one.

use std::sync::Arc;

use incident_core::client::ServiceClient;
use incident_core::metrics::{Registry, DEFAULT_LATENCY_BUCKETS};
use incident_core::Config;
use incident_persist::{AlertStore, IncidentStore, InMemoryAlertStore, InMemoryIncidentStore};

pub struct AppState {
    pub alerts: Arc<dyn AlertStore>,
    pub fallback_incidents: Arc<dyn IncidentStore>,
    pub incident_management: ServiceClient,
    pub config: Config,
    pub metrics: Arc<Registry>,
}

impl AppState {
    pub fn new_in_memory(config: Config) -> Self {
        let incident_management = ServiceClient::new(config.incident_management_url.clone(), config.incident_timeout);
        let metrics = Arc::new(build_registry());
        Self {
            alerts: Arc::new(InMemoryAlertStore::new()),
            fallback_incidents: Arc::new(InMemoryIncidentStore::new()),
            incident_management,
            config,
            metrics,
        }
    }

    #[cfg(feature = "postgres")]
    pub fn with_postgres(config: Config, alerts: Arc<dyn AlertStore>, fallback_incidents: Arc<dyn IncidentStore>) -> Self {
        let incident_management = ServiceClient::new(config.incident_management_url.clone(), config.incident_timeout);
        let metrics = Arc::new(build_registry());
        Self { alerts, fallback_incidents, incident_management, config, metrics }
    }
}

fn build_registry() -> Registry {
    let registry = Registry::new();
    registry.register_counter("alerts_received_total", "alerts accepted via POST /api/v1/alerts");
    registry.register_counter("alerts_correlated_total", "alerts attached to an existing incident or newly created");
    registry.register_counter("incidents_created_total", "new incidents opened from an alert");
    registry.register_counter("incident_management_fallback_total", "alerts that fell back to local incident creation");
    registry.register_histogram("alert_processing_seconds", "time to process one ingest request", DEFAULT_LATENCY_BUCKETS);
    registry
}
