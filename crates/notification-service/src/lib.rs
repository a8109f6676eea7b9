//! Notification: dispatches on-call alerts across mock, email, Slack, and
//! webhook channels and keeps a bounded, queryable delivery log.

pub mod channels;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
