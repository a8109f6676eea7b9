//! Shared harness: boots all four services on ephemeral localhost ports with
//! in-memory stores and wires their `Config` urls to each other, exactly as a
//! real deployment would via environment variables — just pointed at ports
//! chosen at bind time instead of fixed ones.

use std::net::SocketAddr;
use std::sync::Arc;

use incident_core::Config;

async fn bind_and_serve(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

pub struct Harness {
    pub alert_addr: SocketAddr,
    pub incident_addr: SocketAddr,
    pub oncall_addr: SocketAddr,
    pub notification_addr: SocketAddr,
    pub client: reqwest::Client,
}

impl Harness {
    /// Boot all four services with default in-memory stores and no seeded
    /// on-call schedules (tests set up their own schedules as needed).
    pub async fn spawn() -> Self {
        Self::spawn_with(false).await
    }

    pub async fn spawn_with_seeded_schedules() -> Self {
        Self::spawn_with(true).await
    }

    async fn spawn_with(seed_default_schedules: bool) -> Self {
        let notification_config = Config::from_env(0);
        let notification_state = Arc::new(notification_service::AppState::new_in_memory(notification_config));
        let notification_addr = bind_and_serve(notification_service::create_router(notification_state)).await;

        let mut oncall_config = Config::from_env(0);
        oncall_config.notification_service_url = format!("http://{notification_addr}");
        oncall_config.seed_default_schedules = seed_default_schedules;
        let oncall_state = Arc::new(oncall_service::AppState::new_in_memory(oncall_config));
        let oncall_addr = bind_and_serve(oncall_service::create_router(oncall_state)).await;

        let mut incident_config = Config::from_env(0);
        incident_config.oncall_service_url = format!("http://{oncall_addr}");
        incident_config.notification_service_url = format!("http://{notification_addr}");
        let incident_state = Arc::new(incident_management::AppState::new_in_memory(incident_config));
        let incident_addr = bind_and_serve(incident_management::create_router(incident_state)).await;

        let mut alert_config = Config::from_env(0);
        alert_config.incident_management_url = format!("http://{incident_addr}");
        let alert_state = Arc::new(alert_ingestion::AppState::new_in_memory(alert_config));
        let alert_addr = bind_and_serve(alert_ingestion::create_router(alert_state)).await;

        // Give each listener a moment to start accepting before the first request.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        Self { alert_addr, incident_addr, oncall_addr, notification_addr, client: reqwest::Client::new() }
    }

    pub fn alert_url(&self, path: &str) -> String {
        format!("http://{}{}", self.alert_addr, path)
    }

    pub fn incident_url(&self, path: &str) -> String {
        format!("http://{}{}", self.incident_addr, path)
    }

    pub fn oncall_url(&self, path: &str) -> String {
        format!("http://{}{}", self.oncall_addr, path)
    }

    pub fn notification_url(&self, path: &str) -> String {
        format!("http://{}{}", self.notification_addr, path)
    }
}
