use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::calendar::event::{CalendarEvent, Locale};
use crate::storage::config::CalendarConfig;

pub const DEFAULT_PROD_ID: &str = "-//school-portal//Calendar Feed//EN";
const MAX_LINE_OCTETS: usize = 75;

#[derive(Debug, Error, PartialEq)]
pub enum IcalError {
    #[error("Event has an empty UID")]
    MissingUid,
    #[error("Duplicate UID in feed: {0}")]
    DuplicateUid(String),
    #[error("Event {0} ends before it starts")]
    EndBeforeStart(String),
}

/// Writes events as an RFC 5545 calendar for subscription feeds.
pub struct FeedEncoder {
    prod_id: String,
    calendar_name: Option<String>,
    locale: Locale,
    news_base_url: Option<String>,
    generated_at: Option<DateTime<Utc>>,
}

impl FeedEncoder {
    pub fn new() -> Self {
        Self {
            prod_id: DEFAULT_PROD_ID.to_string(),
            calendar_name: None,
            locale: Locale::En,
            news_base_url: None,
            generated_at: None,
        }
    }

    pub fn from_config(config: &CalendarConfig) -> Self {
        let encoder = Self::new()
            .with_prod_id(config.prod_id.clone())
            .with_calendar_name(config.calendar_name.clone())
            .with_locale(config.default_locale);
        let encoder = match &config.news_base_url {
            Some(url) if !url.is_empty() => encoder.with_news_base_url(url.clone()),
            _ => encoder,
        };
        if config.include_timestamp {
            encoder.with_generated_at(Utc::now())
        } else {
            encoder
        }
    }

    pub fn with_prod_id(mut self, prod_id: String) -> Self {
        self.prod_id = prod_id;
        self
    }

    pub fn with_calendar_name(mut self, name: String) -> Self {
        self.calendar_name = Some(name);
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn with_news_base_url(mut self, url: String) -> Self {
        self.news_base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    /// Stamps every event with the generation time instead of its start.
    pub fn with_generated_at(mut self, generated_at: DateTime<Utc>) -> Self {
        self.generated_at = Some(generated_at);
        self
    }

    pub fn encode(&self, events: &[CalendarEvent]) -> Result<String, IcalError> {
        let mut lines = vec![
            "BEGIN:VCALENDAR".to_string(),
            "VERSION:2.0".to_string(),
            format!("PRODID:{}", self.prod_id),
            "CALSCALE:GREGORIAN".to_string(),
            "METHOD:PUBLISH".to_string(),
        ];
        if let Some(name) = &self.calendar_name {
            lines.push(format!("X-WR-CALNAME:{}", escape_text(name)));
        }

        let mut seen = HashSet::new();
        for event in events {
            if event.id.trim().is_empty() {
                return Err(IcalError::MissingUid);
            }
            if !seen.insert(event.id.as_str()) {
                return Err(IcalError::DuplicateUid(event.id.clone()));
            }
            if let Some(end) = event.end
                && end < event.start
            {
                return Err(IcalError::EndBeforeStart(event.id.clone()));
            }
            self.push_event(&mut lines, event);
        }

        lines.push("END:VCALENDAR".to_string());

        let mut output = String::new();
        for line in &lines {
            output.push_str(&fold_line(line));
            output.push_str("\r\n");
        }
        tracing::debug!("Encoded {} events into iCalendar feed", events.len());
        Ok(output)
    }

    fn push_event(&self, lines: &mut Vec<String>, event: &CalendarEvent) {
        lines.push("BEGIN:VEVENT".to_string());
        lines.push(format!("UID:{}", escape_text(&event.id)));
        // Without a generation time the stamp comes from the event, so the
        // output stays a function of the events alone.
        let stamp = self.generated_at.unwrap_or(event.start);
        lines.push(format!("DTSTAMP:{}", format_utc(stamp)));

        if event.all_day {
            let first_day = event.start.date_naive();
            let end_exclusive = event
                .last_day()
                .succ_opt()
                .unwrap_or(first_day);
            lines.push(format!("DTSTART;VALUE=DATE:{}", format_date(first_day)));
            lines.push(format!("DTEND;VALUE=DATE:{}", format_date(end_exclusive)));
        } else {
            lines.push(format!("DTSTART:{}", format_utc(event.start)));
            lines.push(format!("DTEND:{}", format_utc(event.effective_end())));
        }

        lines.push(format!("SUMMARY:{}", escape_text(event.title.get(self.locale))));
        lines.push(format!(
            "DESCRIPTION:{}",
            escape_text(event.description.get(self.locale))
        ));

        if !event.tags.is_empty() {
            let categories: Vec<String> = event
                .tags
                .iter()
                .map(|tag| escape_text(tag.as_str()))
                .collect();
            lines.push(format!("CATEGORIES:{}", categories.join(",")));
        }

        if let Some(base) = &self.news_base_url {
            let slug = event
                .linked_news_post_id
                .clone()
                .unwrap_or_else(|| event.news_slug());
            lines.push(format!("URL:{}/{}", base, urlencoding::encode(&slug)));
        }

        for attachment in &event.attachments {
            lines.push(format!("ATTACH:{}", attachment.url));
        }

        lines.push("END:VEVENT".to_string());
    }
}

impl Default for FeedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Last day an all-day event covers. An end exactly at midnight belongs to
/// the previous day.
fn format_utc(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y%m%dT%H%M%SZ").to_string()
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

pub fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            ';' => escaped.push_str("\\;"),
            ',' => escaped.push_str("\\,"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            other => escaped.push(other),
        }
    }
    escaped
}

/// Folds a content line at 75 octets, never inside a UTF-8 sequence.
pub fn fold_line(line: &str) -> String {
    if line.len() <= MAX_LINE_OCTETS {
        return line.to_string();
    }

    let mut folded = String::with_capacity(line.len() + line.len() / MAX_LINE_OCTETS * 3);
    let mut current_len = 0;
    let mut limit = MAX_LINE_OCTETS;
    for c in line.chars() {
        let width = c.len_utf8();
        if current_len + width > limit {
            folded.push_str("\r\n ");
            current_len = 0;
            limit = MAX_LINE_OCTETS - 1;
        }
        folded.push(c);
        current_len += width;
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::event::{Attachment, EventTag, LocalizedText};
    use chrono::TimeZone;
    use icalendar::{CalendarComponent, Component};
    use pretty_assertions::assert_eq;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, day, hour, minute, 0).unwrap()
    }

    fn summer_term() -> CalendarEvent {
        let mut event = CalendarEvent::new(
            "1",
            LocalizedText::new("Summer Term Begins", "Tymor yr Haf yn Dechrau"),
            at(8, 9, 0),
        )
        .with_end(at(8, 15, 30));
        event.description = LocalizedText::english("First day back for all pupils.");
        event
    }

    fn inset_day() -> CalendarEvent {
        let mut event = CalendarEvent::new("inset-1", LocalizedText::english("INSET Day"), at(14, 0, 0)).all_day();
        event.description = LocalizedText::english("Staff training. School closed to pupils.");
        event.tags = vec![EventTag::Inset];
        event
    }

    fn parse(feed: &str) -> icalendar::Calendar {
        feed.parse::<icalendar::Calendar>().unwrap()
    }

    fn vevents(calendar: &icalendar::Calendar) -> Vec<&icalendar::Event> {
        calendar
            .components
            .iter()
            .filter_map(|component| match component {
                CalendarComponent::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_feed_is_a_valid_calendar() {
        let feed = FeedEncoder::new().encode(&[]).unwrap();

        assert!(feed.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(feed.ends_with("END:VCALENDAR\r\n"));
        assert!(!feed.contains("BEGIN:VEVENT"));
        assert!(vevents(&parse(&feed)).is_empty());
    }

    #[test]
    fn two_events_parse_back_with_matching_fields() {
        let feed = FeedEncoder::new()
            .encode(&[summer_term(), inset_day()])
            .unwrap();

        let calendar = parse(&feed);
        let events = vevents(&calendar);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].property_value("UID"), Some("1"));
        assert_eq!(events[0].property_value("DTSTART"), Some("20250408T090000Z"));
        assert_eq!(events[0].property_value("SUMMARY"), Some("Summer Term Begins"));
        assert_eq!(events[1].property_value("UID"), Some("inset-1"));
        assert_eq!(events[1].property_value("DTSTART"), Some("20250414"));
        assert_eq!(events[1].property_value("SUMMARY"), Some("INSET Day"));
    }

    #[test]
    fn timed_event_without_end_repeats_start() {
        let event = CalendarEvent::new("assembly", LocalizedText::english("Assembly"), at(9, 9, 0));

        let feed = FeedEncoder::new().encode(&[event]).unwrap();

        assert!(feed.contains("DTSTART:20250409T090000Z\r\n"));
        assert!(feed.contains("DTEND:20250409T090000Z\r\n"));
    }

    #[test]
    fn all_day_event_uses_exclusive_date_end() {
        let feed = FeedEncoder::new().encode(&[inset_day()]).unwrap();

        assert!(feed.contains("DTSTART;VALUE=DATE:20250414\r\n"));
        assert!(feed.contains("DTEND;VALUE=DATE:20250415\r\n"));
        assert!(feed.contains("CATEGORIES:INSET\r\n"));
    }

    #[test]
    fn multi_day_all_day_event_covers_its_last_day() {
        let event = CalendarEvent::new("half-term", LocalizedText::english("Half Term"), at(21, 0, 0))
            .with_end(at(25, 15, 0))
            .all_day();

        let feed = FeedEncoder::new().encode(&[event]).unwrap();

        assert!(feed.contains("DTEND;VALUE=DATE:20250426\r\n"));
    }

    #[test]
    fn all_day_end_at_midnight_is_already_exclusive() {
        let event = CalendarEvent::new("holiday", LocalizedText::english("Bank Holiday"), at(21, 0, 0))
            .with_end(at(22, 0, 0))
            .all_day();

        let feed = FeedEncoder::new().encode(&[event]).unwrap();

        assert!(feed.contains("DTEND;VALUE=DATE:20250422\r\n"));
    }

    #[test]
    fn output_is_stable_without_timestamp() {
        let encoder = FeedEncoder::new().with_calendar_name("School Calendar".to_string());
        let events = [summer_term(), inset_day()];

        assert_eq!(encoder.encode(&events).unwrap(), encoder.encode(&events).unwrap());
    }

    #[test]
    fn every_event_carries_a_dtstamp_from_its_start() {
        let feed = FeedEncoder::new().encode(&[summer_term(), inset_day()]).unwrap();

        assert_eq!(feed.matches("BEGIN:VEVENT").count(), feed.matches("DTSTAMP:").count());
        assert!(feed.contains("UID:1\r\nDTSTAMP:20250408T090000Z\r\n"));
        assert!(feed.contains("UID:inset-1\r\nDTSTAMP:20250414T000000Z\r\n"));
    }

    #[test]
    fn generation_timestamp_overrides_dtstamp() {
        let encoder = FeedEncoder::new().with_generated_at(at(1, 12, 0));

        let feed = encoder.encode(&[summer_term()]).unwrap();

        assert!(feed.contains("DTSTAMP:20250401T120000Z\r\n"));
    }

    #[test]
    fn welsh_locale_uses_welsh_title() {
        let feed = FeedEncoder::new()
            .with_locale(Locale::Cy)
            .encode(&[summer_term()])
            .unwrap();

        assert!(feed.contains("SUMMARY:Tymor yr Haf yn Dechrau\r\n"));
    }

    #[test]
    fn duplicate_uid_is_rejected() {
        let result = FeedEncoder::new().encode(&[summer_term(), summer_term()]);

        assert_eq!(result, Err(IcalError::DuplicateUid("1".to_string())));
    }

    #[test]
    fn end_before_start_is_rejected() {
        let event = CalendarEvent::new("bad", LocalizedText::english("Bad"), at(9, 10, 0)).with_end(at(9, 9, 0));

        let result = FeedEncoder::new().encode(&[event]);

        assert_eq!(result, Err(IcalError::EndBeforeStart("bad".to_string())));
    }

    #[test]
    fn news_url_prefers_linked_post() {
        let mut event = summer_term();
        event.linked_news_post_id = Some("post-42".to_string());
        let encoder = FeedEncoder::new().with_news_base_url("https://example.sch.uk/news/".to_string());

        let feed = encoder.encode(&[event, inset_day()]).unwrap();

        assert!(feed.contains("URL:https://example.sch.uk/news/post-42\r\n"));
        assert!(feed.contains("URL:https://example.sch.uk/news/inset-day\r\n"));
    }

    #[test]
    fn attachments_become_attach_lines() {
        let mut event = summer_term();
        event.attachments = vec![Attachment {
            name: "Letter".to_string(),
            url: "https://example.sch.uk/letter.pdf".to_string(),
        }];

        let feed = FeedEncoder::new().encode(&[event]).unwrap();

        assert!(feed.contains("ATTACH:https://example.sch.uk/letter.pdf\r\n"));
    }

    #[test]
    fn config_sets_name_locale_and_news_links() {
        let config = CalendarConfig {
            calendar_name: "Ysgol Calendar".to_string(),
            default_locale: Locale::Cy,
            news_base_url: Some("https://school.example/news/".to_string()),
            ..CalendarConfig::default()
        };

        let feed = FeedEncoder::from_config(&config).encode(&[summer_term()]).unwrap();

        assert!(feed.contains("X-WR-CALNAME:Ysgol Calendar\r\n"));
        assert!(feed.contains("SUMMARY:Tymor yr Haf yn Dechrau\r\n"));
        assert!(feed.contains("URL:https://school.example/news/summer-term-begins\r\n"));
        assert!(feed.contains("DTSTAMP:20250408T090000Z\r\n"));
    }

    #[test]
    fn text_values_are_escaped() {
        assert_eq!(escape_text("a,b;c\\d\ne"), "a\\,b\\;c\\\\d\\ne");
    }

    #[test]
    fn long_lines_fold_without_splitting_characters() {
        let line = format!("SUMMARY:{}", "ŵ".repeat(60));

        let folded = fold_line(&line);

        for (i, segment) in folded.split("\r\n").enumerate() {
            assert!(segment.len() <= 75, "segment {} too long", i);
        }
        assert_eq!(folded.replace("\r\n ", ""), line);
    }
}
