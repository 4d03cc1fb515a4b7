use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::relevance::RelevanceLabel;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Cy,
}

impl Locale {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Some(Locale::En),
            "cy" | "welsh" | "cymraeg" => Some(Locale::Cy),
            _ => None,
        }
    }
}

/// Text with an English variant and an optional Welsh variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizedText {
    pub en: String,
    pub cy: Option<String>,
}

impl LocalizedText {
    pub fn new(en: impl Into<String>, cy: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            cy: Some(cy.into()),
        }
    }

    pub fn english(en: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            cy: None,
        }
    }

    /// Welsh falls back to English when no Welsh text was supplied.
    pub fn get(&self, locale: Locale) -> &str {
        match locale {
            Locale::En => &self.en,
            Locale::Cy => self
                .cy
                .as_deref()
                .filter(|text| !text.trim().is_empty())
                .unwrap_or(&self.en),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTag {
    Holiday,
    Inset,
    Event,
    Trip,
    ParentsEvening,
    Other(String),
}

impl EventTag {
    pub fn as_str(&self) -> &str {
        match self {
            EventTag::Holiday => "Holiday",
            EventTag::Inset => "INSET",
            EventTag::Event => "Event",
            EventTag::Trip => "Trip",
            EventTag::ParentsEvening => "Parents Evening",
            EventTag::Other(label) => label,
        }
    }
}

impl From<&str> for EventTag {
    fn from(value: &str) -> Self {
        match value.trim() {
            "Holiday" => EventTag::Holiday,
            "INSET" => EventTag::Inset,
            "Event" => EventTag::Event,
            "Trip" => EventTag::Trip,
            "Parents Evening" => EventTag::ParentsEvening,
            other => EventTag::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub title: LocalizedText,
    pub description: LocalizedText,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub tags: Vec<EventTag>,
    pub relevant_to: Vec<RelevanceLabel>,
    pub attachments: Vec<Attachment>,
    pub linked_news_post_id: Option<String>,
}

impl CalendarEvent {
    pub fn new(id: impl Into<String>, title: LocalizedText, start: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title,
            description: LocalizedText::default(),
            start,
            end: None,
            all_day: false,
            tags: Vec::new(),
            relevant_to: Vec::new(),
            attachments: Vec::new(),
            linked_news_post_id: None,
        }
    }

    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_relevance(mut self, labels: Vec<RelevanceLabel>) -> Self {
        self.relevant_to = labels;
        self
    }

    pub fn all_day(mut self) -> Self {
        self.all_day = true;
        self
    }

    pub fn is_for_everyone(&self) -> bool {
        self.relevant_to.is_empty() || self.relevant_to.iter().any(RelevanceLabel::is_all)
    }

    pub fn is_relevant_to(&self, year_groups: &[RelevanceLabel]) -> bool {
        self.is_for_everyone() || self.relevant_to.iter().any(|label| year_groups.contains(label))
    }

    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end.unwrap_or(self.start)
    }

    /// Last calendar day an all-day event covers. An end exactly at midnight
    /// belongs to the day before.
    pub fn last_day(&self) -> NaiveDate {
        match self.end {
            Some(end) if end > self.start => {
                if end.num_seconds_from_midnight() == 0 && end.nanosecond() == 0 {
                    (end - Duration::days(1)).date_naive()
                } else {
                    end.date_naive()
                }
            }
            _ => self.start.date_naive(),
        }
    }

    /// Exclusive end of the time the event occupies. All-day events run to
    /// midnight (UTC) after their last day.
    pub fn occupied_until(&self) -> DateTime<Utc> {
        if !self.all_day {
            return self.effective_end();
        }
        self.last_day()
            .succ_opt()
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc())
            .unwrap_or_else(|| self.effective_end())
    }

    /// Slug of the English title, used to find the news article for an event.
    pub fn news_slug(&self) -> String {
        self.title
            .en
            .to_lowercase()
            .replace(' ', "-")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect()
    }
}
