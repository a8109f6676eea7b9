//! # incident-core
//!
//! Shared domain types, configuration, deterministic hashing, cross-service
//! HTTP client, request-id middleware, and metrics registry for the
//! Incident & On-Call Management Platform.
//!
//! Every service crate (`alert-ingestion`, `incident-management`,
//! `oncall-service`, `notification-service`) depends on this crate and
//! nothing else in the workspace but `incident-persist`.

pub mod canonical;
pub mod client;
pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod middleware;
pub mod types;

pub use config::Config;
pub use error::{ApiError, ApiResult, ErrorBody};
pub use ids::{AlertId, EscalationId, IncidentId, NotificationId, ScheduleId};

/// Schema version echoed by `/health` across every service.
pub const PLATFORM_SCHEMA_VERSION: &str = "1.0.0";
