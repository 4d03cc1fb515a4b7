pub mod aggregator;
pub mod event;
pub mod ical;
pub mod relevance;

pub use aggregator::{CalendarView, filter_relevant, group_by_date, sorted_events, upcoming};
pub use event::{Attachment, CalendarEvent, EventTag, Locale, LocalizedText};
pub use ical::{FeedEncoder, IcalError};
pub use relevance::RelevanceLabel;
