use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::{Attachment, CalendarEvent, EventTag, LocalizedText, RelevanceLabel};
use crate::inbox::{InboxMessage, MessageKind, Participant, ParticipantRole, ReadFlags};

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid timestamp for {field}: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("Event {0} ends before it starts")]
    EndBeforeStart(String),
    #[error("Invalid participant role: {0}")]
    InvalidRole(String),
}

/// Accepts RFC 3339, offset-less `YYYY-MM-DDTHH:MM[:SS]` (read as UTC) and
/// bare dates (midnight UTC).
pub fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }
    Err(ValidationError::InvalidTimestamp {
        field,
        value: value.to_string(),
    })
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

/// Year groups arrive as labels (`"Year3"`) or as bare numbers in older
/// documents (`3`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Number(u8),
    Text(String),
}

impl LabelValue {
    fn to_label(&self) -> Option<RelevanceLabel> {
        match self {
            LabelValue::Number(year) => Some(RelevanceLabel::year(*year)),
            LabelValue::Text(text) => RelevanceLabel::parse(text),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "title_en", default)]
    pub title_en: String,
    #[serde(rename = "title_cy", default, skip_serializing_if = "Option::is_none")]
    pub title_cy: Option<String>,
    #[serde(rename = "description_en", default)]
    pub description_en: String,
    #[serde(rename = "description_cy", default, skip_serializing_if = "Option::is_none")]
    pub description_cy: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_to: Option<Vec<LabelValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_groups: Option<Vec<LabelValue>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_news_post_id: Option<String>,
}

impl TryFrom<EventRecord> for CalendarEvent {
    type Error = ValidationError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        if record.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if record.title_en.trim().is_empty() {
            return Err(ValidationError::MissingField("title_en"));
        }
        let start = match non_empty(record.start) {
            Some(value) => parse_timestamp("start", &value)?,
            None => return Err(ValidationError::MissingField("start")),
        };
        let end = non_empty(record.end)
            .map(|value| parse_timestamp("end", &value))
            .transpose()?;
        if let Some(end) = end
            && end < start
        {
            return Err(ValidationError::EndBeforeStart(record.id));
        }

        let mut relevant_to: Vec<RelevanceLabel> = Vec::new();
        for value in record
            .relevant_to
            .iter()
            .flatten()
            .chain(record.year_groups.iter().flatten())
        {
            if let Some(label) = value.to_label()
                && !relevant_to.contains(&label)
            {
                relevant_to.push(label);
            }
        }

        Ok(CalendarEvent {
            id: record.id,
            title: LocalizedText {
                en: record.title_en,
                cy: non_empty(record.title_cy),
            },
            description: LocalizedText {
                en: record.description_en,
                cy: non_empty(record.description_cy),
            },
            start,
            end,
            all_day: record.all_day,
            tags: record.tags.iter().map(|tag| EventTag::from(tag.as_str())).collect(),
            relevant_to,
            attachments: record.attachments,
            linked_news_post_id: non_empty(record.linked_news_post_id),
        })
    }
}

impl From<&CalendarEvent> for EventRecord {
    fn from(event: &CalendarEvent) -> Self {
        Self {
            id: event.id.clone(),
            title_en: event.title.en.clone(),
            title_cy: event.title.cy.clone(),
            description_en: event.description.en.clone(),
            description_cy: event.description.cy.clone(),
            start: Some(format_timestamp(event.start)),
            end: event.end.map(format_timestamp),
            all_day: event.all_day,
            tags: event.tags.iter().map(|tag| tag.as_str().to_string()).collect(),
            relevant_to: Some(
                event
                    .relevant_to
                    .iter()
                    .map(|label| LabelValue::Text(label.to_string()))
                    .collect(),
            ),
            year_groups: None,
            attachments: event.attachments.clone(),
            linked_news_post_id: event.linked_news_post_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "type", default)]
    pub role: String,
}

impl ParticipantRecord {
    fn into_participant(self, field: &'static str) -> Result<Participant, ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField(field));
        }
        let role = ParticipantRole::parse(&self.role)
            .ok_or_else(|| ValidationError::InvalidRole(self.role.clone()))?;
        Ok(Participant {
            id: self.id,
            name: self.name,
            email: self.email,
            role,
        })
    }
}

impl From<&Participant> for ParticipantRecord {
    fn from(participant: &Participant) -> Self {
        Self {
            id: participant.id.clone(),
            name: participant.name.clone(),
            email: participant.email.clone(),
            role: participant.role.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub sender: Option<ParticipantRecord>,
    #[serde(default)]
    pub recipient: Option<ParticipantRecord>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub is_read_by_parent: bool,
    #[serde(default)]
    pub is_read_by_admin: bool,
    #[serde(default)]
    pub is_read_by_teacher: bool,
}

impl TryFrom<MessageRecord> for InboxMessage {
    type Error = ValidationError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        if record.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        let created_at = match non_empty(record.created_at) {
            Some(value) => parse_timestamp("createdAt", &value)?,
            None => return Err(ValidationError::MissingField("createdAt")),
        };
        let sender = record
            .sender
            .ok_or(ValidationError::MissingField("sender"))?
            .into_participant("sender")?;
        let recipient = record
            .recipient
            .ok_or(ValidationError::MissingField("recipient"))?
            .into_participant("recipient")?;

        Ok(InboxMessage {
            id: record.id,
            thread_id: non_empty(record.thread_id),
            kind: MessageKind::parse(&record.kind),
            subject: record.subject,
            body: record.body,
            sender,
            recipient,
            created_at,
            read: ReadFlags {
                parent: record.is_read_by_parent,
                admin: record.is_read_by_admin,
                teacher: record.is_read_by_teacher,
            },
        })
    }
}

impl From<&InboxMessage> for MessageRecord {
    fn from(message: &InboxMessage) -> Self {
        Self {
            id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            kind: message.kind.as_str().to_string(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            sender: Some(ParticipantRecord::from(&message.sender)),
            recipient: Some(ParticipantRecord::from(&message.recipient)),
            created_at: Some(format_timestamp(message.created_at)),
            is_read_by_parent: message.read.parent,
            is_read_by_admin: message.read.admin,
            is_read_by_teacher: message.read.teacher,
        }
    }
}
