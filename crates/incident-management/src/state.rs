//! Shared service state for Incident Management.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use incident_core::client::ServiceClient;
use incident_core::ids::IncidentId;
use incident_core::metrics::{Registry, DEFAULT_LATENCY_BUCKETS};
use incident_core::Config;
use incident_persist::{IncidentStore, InMemoryIncidentStore};
use parking_lot::RwLock;

pub struct AppState {
    pub incidents: Arc<dyn IncidentStore>,
    pub oncall: ServiceClient,
    pub notifications: ServiceClient,
    pub config: Config,
    pub metrics: Arc<Registry>,
    /// `Idempotency-Key` -> (incident created for that key, insertion time).
    /// Pruned lazily on lookup; entries older than `config.idempotency_key_ttl`
    /// are treated as absent.
    idempotency_cache: RwLock<BTreeMap<String, (IncidentId, Instant)>>,
}

impl AppState {
    pub fn new_in_memory(config: Config) -> Self {
        let oncall = ServiceClient::new(config.oncall_service_url.clone(), config.oncall_timeout);
        let notifications = ServiceClient::new(config.notification_service_url.clone(), config.notification_timeout);
        let metrics = Arc::new(build_registry());
        Self {
            incidents: Arc::new(InMemoryIncidentStore::new()),
            oncall,
            notifications,
            config,
            metrics,
            idempotency_cache: RwLock::new(BTreeMap::new()),
        }
    }

    #[cfg(feature = "postgres")]
    pub fn with_postgres(config: Config, incidents: Arc<dyn IncidentStore>) -> Self {
        let oncall = ServiceClient::new(config.oncall_service_url.clone(), config.oncall_timeout);
        let notifications = ServiceClient::new(config.notification_service_url.clone(), config.notification_timeout);
        let metrics = Arc::new(build_registry());
        Self {
            incidents,
            oncall,
            notifications,
            config,
            metrics,
            idempotency_cache: RwLock::new(BTreeMap::new()),
        }
    }

    /// Look up a cached incident for `key`, evicting it if past TTL.
    pub fn idempotent_lookup(&self, key: &str) -> Option<IncidentId> {
        let mut guard = self.idempotency_cache.write();
        match guard.get(key) {
            Some((incident_id, inserted_at)) if inserted_at.elapsed() < self.config.idempotency_key_ttl => Some(*incident_id),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn idempotent_store(&self, key: String, incident_id: IncidentId) {
        self.idempotency_cache.write().insert(key, (incident_id, Instant::now()));
    }
}

fn build_registry() -> Registry {
    let registry = Registry::new();
    registry.register_counter("incidents_created_total", "incidents opened");
    registry.register_counter("incidents_correlated_total", "alerts attached to an existing incident");
    registry.register_counter("incidents_patched_total", "PATCH requests applied");
    registry.register_counter("notifications_dispatch_failed_total", "notify calls that did not complete");
    registry.register_gauge("incidents_by_status", "current incident count per status");
    registry.register_histogram("incident_mtta_seconds", "time from creation to acknowledgement", DEFAULT_LATENCY_BUCKETS);
    registry.register_histogram("incident_mttr_seconds", "time from creation to resolution", DEFAULT_LATENCY_BUCKETS);
    registry.register_histogram("request_duration_seconds", "handler latency", DEFAULT_LATENCY_BUCKETS);
    registry
}
