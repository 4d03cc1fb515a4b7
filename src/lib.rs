pub mod calendar;
pub mod inbox;
pub mod server;
pub mod storage;
pub mod viewer;

pub use calendar::{CalendarEvent, FeedEncoder, RelevanceLabel};
pub use inbox::{InboxMessage, InboxService, Thread};
pub use viewer::Viewer;
