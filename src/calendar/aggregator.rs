use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::calendar::event::CalendarEvent;
use crate::calendar::relevance::RelevanceLabel;
use crate::viewer::Viewer;

/// Ascending by start. The sort is stable, so equal starts keep input order.
pub fn sorted_events(mut events: Vec<CalendarEvent>) -> Vec<CalendarEvent> {
    events.sort_by_key(|event| event.start);
    events
}

pub fn filter_relevant(
    events: Vec<CalendarEvent>,
    year_groups: &[RelevanceLabel],
) -> Vec<CalendarEvent> {
    events
        .into_iter()
        .filter(|event| event.is_relevant_to(year_groups))
        .collect()
}

/// Buckets events by the local calendar day of their start in `tz`.
///
/// Days iterate in chronological order and each day keeps the input order,
/// so feeding sorted events gives a chronological view.
pub fn group_by_date<Tz: TimeZone>(
    events: Vec<CalendarEvent>,
    tz: &Tz,
) -> BTreeMap<NaiveDate, Vec<CalendarEvent>> {
    let mut groups: BTreeMap<NaiveDate, Vec<CalendarEvent>> = BTreeMap::new();
    for event in events {
        let day = event.start.with_timezone(tz).date_naive();
        groups.entry(day).or_default().push(event);
    }
    groups
}

/// Events still running at or after `now`, earliest first. All-day events
/// last until the end of their final day.
pub fn upcoming(events: Vec<CalendarEvent>, now: DateTime<Utc>, limit: usize) -> Vec<CalendarEvent> {
    sorted_events(events)
        .into_iter()
        .filter(|event| {
            if event.all_day {
                event.occupied_until() > now
            } else {
                event.effective_end() >= now
            }
        })
        .take(limit)
        .collect()
}

/// A viewer's calendar with the "only show mine" toggle.
pub struct CalendarView<'a> {
    viewer: &'a Viewer,
    only_mine: bool,
}

impl<'a> CalendarView<'a> {
    pub fn new(viewer: &'a Viewer) -> Self {
        Self {
            viewer,
            only_mine: false,
        }
    }

    pub fn only_mine(mut self, only_mine: bool) -> Self {
        self.only_mine = only_mine;
        self
    }

    /// A viewer with no year groups sees everything even with the toggle on.
    pub fn events(&self, events: Vec<CalendarEvent>) -> Vec<CalendarEvent> {
        let sorted = sorted_events(events);
        if self.only_mine && !self.viewer.year_groups.is_empty() {
            filter_relevant(sorted, &self.viewer.year_groups)
        } else {
            sorted
        }
    }

    pub fn days<Tz: TimeZone>(
        &self,
        events: Vec<CalendarEvent>,
        tz: &Tz,
    ) -> BTreeMap<NaiveDate, Vec<CalendarEvent>> {
        group_by_date(self.events(events), tz)
    }
}
