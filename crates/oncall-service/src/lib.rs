//! On-Call & Escalation: rotation rosters, time-bounded manual overrides,
//! and the escalation log. Serves the `GET /api/v1/oncall/current` contact
//! lookup that Incident Management and other on-call consumers depend on.

pub mod routes;
pub mod rotation;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
