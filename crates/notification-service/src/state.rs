//! Shared service state for the Notification service.

use std::sync::Arc;

use incident_core::metrics::{Registry, DEFAULT_LATENCY_BUCKETS};
use incident_core::Config;
use incident_persist::{InMemoryNotificationStore, NotificationStore};

pub struct AppState {
    pub notifications: Arc<dyn NotificationStore>,
    pub http: reqwest::Client,
    pub config: Config,
    pub metrics: Arc<Registry>,
}

impl AppState {
    pub fn new_in_memory(config: Config) -> Self {
        let metrics = Arc::new(build_registry());
        let http = reqwest::Client::builder()
            .timeout(config.notification_timeout)
            .build()
            .expect("reqwest client build is infallible with default tls backend");
        Self {
            notifications: Arc::new(InMemoryNotificationStore::new(config.max_log_size)),
            http,
            config,
            metrics,
        }
    }
}

fn build_registry() -> Registry {
    let registry = Registry::new();
    registry.register_counter("notifications_sent_total", "notifications dispatched, by channel and outcome status");
    registry.register_histogram("dispatch_duration_seconds", "time to dispatch one notification", DEFAULT_LATENCY_BUCKETS);
    registry
}
