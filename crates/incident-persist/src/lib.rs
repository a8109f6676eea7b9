//! Storage backends for the incident platform.
//!
//! Each aggregate gets its own trait (`AlertStore`, `IncidentStore`,
//! `OnCallStore`, `NotificationStore`) plus a `BTreeMap`-backed in-memory
//! implementation that every service runs by default. `AlertStore` and
//! `IncidentStore` additionally get a `PostgresAlertStore`/
//! `PostgresIncidentStore` behind the `postgres` feature, matching the
//! relational schema that is authoritative for those two aggregates.

pub mod alert_store;
pub mod error;
pub mod incident_store;
pub mod notification_store;
pub mod oncall_store;

pub use alert_store::{AlertFilter, AlertStore, InMemoryAlertStore};
pub use error::{AlertStoreError, IncidentStoreError, NotificationStoreError, OnCallStoreError};
pub use incident_store::{CorrelateOutcome, CorrelateParams, IncidentFilter, IncidentPatch, IncidentStore, InMemoryIncidentStore, PatchOutcome, StatsSummary};
pub use notification_store::{InMemoryNotificationStore, NotificationFilter, NotificationStatsSummary, NotificationStore};
pub use oncall_store::{InMemoryOnCallStore, OnCallStore, SchedulePatch};

#[cfg(feature = "postgres")]
pub use alert_store::postgres::PostgresAlertStore;
#[cfg(feature = "postgres")]
pub use incident_store::postgres::PostgresIncidentStore;
