//! Domain entities shared across the incident platform's services.

pub mod alert;
pub mod incident;
pub mod notification;
pub mod oncall;
pub mod timeline;

pub use alert::{Alert, Severity};
pub use incident::{Incident, IncidentStatus};
pub use notification::{Channel, Notification, NotificationStatus};
pub use oncall::{Escalation, HistoryEvent, HistoryEventKind, Member, Override, Role as OnCallRole, RotationType, Schedule};
pub use timeline::{EventType, IncidentNote, TimelineEvent};
