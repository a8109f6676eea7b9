//! Process-wide configuration loaded once from the environment.
//!
//! Mirrors `PostgresConfig::from_env` in the graph kernel this workspace grew
//! from: every tunable has a typed field and a documented default, read once
//! at startup and then treated as immutable (wrapped in `Arc` by callers).

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Configuration shared by every service binary.
///
/// Not every field is meaningful to every service; each binary reads the
/// subset it needs. Keeping them in one struct avoids five slightly
/// different environment parsing routines drifting apart.
#[derive(Debug, Clone)]
pub struct Config {
    /// `DATABASE_URL` — persistence endpoint (Postgres connection string).
    pub database_url: Option<String>,
    /// `CORRELATION_WINDOW_MINUTES` (default 5) — alert correlation window W.
    pub correlation_window_minutes: i64,
    /// `ONCALL_SERVICE_URL` — base URL of the On-Call service.
    pub oncall_service_url: String,
    /// `NOTIFICATION_SERVICE_URL` — base URL of the Notification service.
    pub notification_service_url: String,
    /// `INCIDENT_MANAGEMENT_URL` — base URL of the Incident Management service.
    pub incident_management_url: String,
    /// `ONCALL_TIMEOUT` (seconds) — deadline for on-call lookups.
    pub oncall_timeout: Duration,
    /// `NOTIFICATION_TIMEOUT` (seconds) — deadline for notify calls.
    pub notification_timeout: Duration,
    /// `INCIDENT_TIMEOUT` (seconds) — deadline for incident-creation calls.
    pub incident_timeout: Duration,
    /// `DEFAULT_OVERRIDE_HOURS` (default 8), bounded to `[1, 168]`.
    pub default_override_hours: u32,
    /// `MAX_HISTORY_SIZE` — cap on the on-call audit history ring.
    pub max_history_size: usize,
    /// `MAX_ESCALATION_LOG_SIZE` — cap on the escalation ring.
    pub max_escalation_log_size: usize,
    /// `MAX_LOG_SIZE` — cap on the notification log ring.
    pub max_log_size: usize,
    /// `SEED_DEFAULT_SCHEDULES` — whether to seed example schedules at startup.
    pub seed_default_schedules: bool,
    /// `WEBHOOK_URL` — if set, the webhook channel performs real delivery.
    pub webhook_url: Option<String>,
    /// `CORS_ORIGINS` — comma-separated allowlist.
    pub cors_origins: Vec<String>,
    /// `LOG_LEVEL` — verbosity passed to `tracing_subscriber::EnvFilter`.
    pub log_level: String,
    /// `LOG_FORMAT` — `"json"` (default) or `"pretty"`.
    pub log_format: String,
    /// `HOST` — bind address (default `0.0.0.0`).
    pub host: String,
    /// `PORT` — bind port; each service has its own default.
    pub port: u16,
    /// `IDEMPOTENCY_KEY_TTL_SECONDS` — TTL for incident-creation idempotency keys.
    pub idempotency_key_ttl: Duration,
}

impl Config {
    /// Load configuration from the environment, applying the documented
    /// defaults for anything unset. `default_port` lets each service binary
    /// supply its own conventional port.
    pub fn from_env(default_port: u16) -> Self {
        let bound = |hours: u32| hours.clamp(1, 168);

        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            correlation_window_minutes: env_parse("CORRELATION_WINDOW_MINUTES", 5),
            oncall_service_url: env_string("ONCALL_SERVICE_URL", "http://localhost:8003"),
            notification_service_url: env_string(
                "NOTIFICATION_SERVICE_URL",
                "http://localhost:8004",
            ),
            incident_management_url: env_string(
                "INCIDENT_MANAGEMENT_URL",
                "http://localhost:8002",
            ),
            oncall_timeout: Duration::from_secs(env_parse("ONCALL_TIMEOUT", 3)),
            notification_timeout: Duration::from_secs(env_parse("NOTIFICATION_TIMEOUT", 3)),
            incident_timeout: Duration::from_secs(env_parse("INCIDENT_TIMEOUT", 3)),
            default_override_hours: bound(env_parse("DEFAULT_OVERRIDE_HOURS", 8)),
            max_history_size: env_parse("MAX_HISTORY_SIZE", 1000),
            max_escalation_log_size: env_parse("MAX_ESCALATION_LOG_SIZE", 500),
            max_log_size: env_parse("MAX_LOG_SIZE", 1000),
            seed_default_schedules: env_parse("SEED_DEFAULT_SCHEDULES", false),
            webhook_url: std::env::var("WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
                .unwrap_or_default(),
            log_level: env_string("LOG_LEVEL", "info"),
            log_format: env_string("LOG_FORMAT", "json"),
            host: env_string("HOST", "0.0.0.0"),
            port: env_parse("PORT", default_port),
            idempotency_key_ttl: Duration::from_secs(env_parse("IDEMPOTENCY_KEY_TTL_SECONDS", 86400)),
        }
    }

    /// Resolve the `service` field of an incident/alert to an on-call team.
    ///
    /// The source material treats `team` and `service` as synonymous without
    /// defining a mapping table. Rather than silently guessing at a mapping,
    /// this is the single explicit seam: identity by default, overridable by
    /// services that need a real lookup later.
    pub fn resolve_team(&self, service: &str) -> String {
        service.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_override_hours_is_bounded() {
        std::env::set_var("DEFAULT_OVERRIDE_HOURS", "9999");
        let cfg = Config::from_env(8000);
        assert_eq!(cfg.default_override_hours, 168);
        std::env::remove_var("DEFAULT_OVERRIDE_HOURS");
    }

    #[test]
    fn resolve_team_is_identity_by_default() {
        let cfg = Config::from_env(8000);
        assert_eq!(cfg.resolve_team("frontend-api"), "frontend-api");
    }
}
