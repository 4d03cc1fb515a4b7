pub mod compose;
pub mod message;
pub mod service;
pub mod threads;

pub use compose::{AbsenceReport, NotificationKind};
pub use message::{InboxMessage, MessageKind, Participant, ParticipantRole, ReadFlags};
pub use service::{InboxError, InboxService, MarkReadOutcome};
pub use threads::{Thread, build_threads, group_by_thread, mark_thread_read, order_threads};
