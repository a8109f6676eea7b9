//! Shared service state for On-Call & Escalation.

use std::collections::BTreeMap;
use std::sync::Arc;

use incident_core::client::ServiceClient;
use incident_core::metrics::{Registry, DEFAULT_LATENCY_BUCKETS};
use incident_core::Config;
use incident_persist::{InMemoryOnCallStore, OnCallStore};
use parking_lot::RwLock;

pub struct AppState {
    pub oncall: Arc<dyn OnCallStore>,
    pub notifications: ServiceClient,
    pub config: Config,
    pub metrics: Arc<Registry>,
    /// Last-observed primary-contact email per team, used to detect a
    /// rotation change between two `current` lookups (see `routes::rotation_changed`).
    pub last_known_primary: RwLock<BTreeMap<String, String>>,
}

impl AppState {
    pub fn new_in_memory(config: Config) -> Self {
        let notifications = ServiceClient::new(config.notification_service_url.clone(), config.notification_timeout);
        let metrics = Arc::new(build_registry());
        let store = if config.seed_default_schedules {
            InMemoryOnCallStore::seeded(config.max_escalation_log_size, config.max_history_size)
        } else {
            InMemoryOnCallStore::new(config.max_escalation_log_size, config.max_history_size)
        };
        Self {
            oncall: Arc::new(store),
            notifications,
            config,
            metrics,
            last_known_primary: RwLock::new(BTreeMap::new()),
        }
    }
}

fn build_registry() -> Registry {
    let registry = Registry::new();
    registry.register_counter("oncall_requests_total", "HTTP requests served, by method/endpoint/status");
    registry.register_counter("oncall_lookups_total", "current on-call lookups served, by team");
    registry.register_counter("overrides_created_total", "manual overrides set");
    registry.register_counter("oncall_escalations_total", "escalations recorded, by team");
    registry.register_counter("oncall_rotation_changes_total", "on-duty contact changes observed between lookups, by team");
    registry.register_counter("notify_dispatch_failed_total", "rotation-change notifications that failed to dispatch");
    registry.register_gauge("oncall_active_schedules", "schedules currently configured");
    registry.register_gauge("oncall_overrides_active", "teams with a non-expired manual override");
    registry.register_histogram("lookup_duration_seconds", "time to resolve the current on-call contact", DEFAULT_LATENCY_BUCKETS);
    registry
}
