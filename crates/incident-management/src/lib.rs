//! Incident Management: owns the incident lifecycle state machine, the
//! append-only timeline and notes, and fans out on-call lookup +
//! notification dispatch whenever an incident is opened.

pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
