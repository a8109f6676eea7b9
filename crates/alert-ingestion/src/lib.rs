//! Alert Ingestion: accepts alerts from monitoring sources, deduplicates by
//! fingerprint, and correlates them into incidents via Incident Management
//! (falling back to direct local incident creation if that service is
//! unreachable).

pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
