use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::inbox::message::{InboxMessage, MessageKind, Participant, ParticipantRole, ReadFlags};
use crate::inbox::service::InboxError;
use crate::inbox::threads::Thread;

const MIN_REASON_LEN: usize = 10;
const REPLY_PREFIX: &str = "Re: ";

#[derive(Debug, Clone, PartialEq)]
pub struct AbsenceReport {
    pub child_name: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub reason: String,
}

impl AbsenceReport {
    fn dates(&self) -> String {
        match self.end_date {
            Some(end) if end != self.start_date => format!("{} to {}", self.start_date, end),
            _ => self.start_date.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Achievement,
    Incident,
    General,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Achievement => "Achievement",
            NotificationKind::Incident => "Incident",
            NotificationKind::General => "General",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "achievement" => Some(NotificationKind::Achievement),
            "incident" => Some(NotificationKind::Incident),
            "general" => Some(NotificationKind::General),
            _ => None,
        }
    }
}

fn new_message(
    kind: MessageKind,
    subject: String,
    body: String,
    sender: &Participant,
    recipient: &Participant,
    now: DateTime<Utc>,
) -> InboxMessage {
    InboxMessage {
        id: Uuid::new_v4().to_string(),
        thread_id: None,
        kind,
        subject,
        body,
        sender: sender.clone(),
        recipient: recipient.clone(),
        created_at: now,
        read: ReadFlags::read_by(sender.role),
    }
}

pub fn absence_report(
    parent: &Participant,
    school_admin: &Participant,
    report: &AbsenceReport,
    now: DateTime<Utc>,
) -> Result<InboxMessage, InboxError> {
    if parent.role != ParticipantRole::Parent {
        return Err(InboxError::Invalid(format!(
            "absence reports are sent by parents, not {}",
            parent.role.as_str()
        )));
    }
    let child_name = report.child_name.trim();
    if child_name.is_empty() {
        return Err(InboxError::Invalid("child name is required".to_string()));
    }
    let reason = report.reason.trim();
    if reason.chars().count() < MIN_REASON_LEN {
        return Err(InboxError::Invalid(format!(
            "reason must be at least {} characters",
            MIN_REASON_LEN
        )));
    }
    if let Some(end) = report.end_date
        && end < report.start_date
    {
        return Err(InboxError::Invalid(
            "absence end date is before its start date".to_string(),
        ));
    }

    let body = format!(
        "Child: {}\nDate of Absence: {}\nReason: {}\n---\nSubmitted by: {} ({})",
        child_name,
        report.dates(),
        reason,
        parent.name,
        parent.email
    );

    Ok(new_message(
        MessageKind::Absence,
        format!("Absence Report for {}", child_name),
        body,
        parent,
        school_admin,
        now,
    ))
}

/// Reply from `sender` to the other side of `thread`.
pub fn reply(
    thread: &Thread,
    sender: &Participant,
    body: &str,
    now: DateTime<Utc>,
) -> Result<InboxMessage, InboxError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(InboxError::EmptyBody);
    }
    let recipient = thread
        .counterpart(&sender.id)
        .ok_or_else(|| InboxError::NoCounterpart(thread.key().to_string()))?;

    let subject = if thread.subject().starts_with(REPLY_PREFIX) {
        thread.subject().to_string()
    } else {
        format!("{}{}", REPLY_PREFIX, thread.subject())
    };

    let mut message = new_message(
        MessageKind::Reply,
        subject,
        body.to_string(),
        sender,
        recipient,
        now,
    );
    message.thread_id = Some(thread.key().to_string());
    Ok(message)
}

pub fn teacher_notification(
    teacher: &Participant,
    parent: &Participant,
    child_name: &str,
    kind: NotificationKind,
    notes: &str,
    treatment_given: Option<&str>,
    now: DateTime<Utc>,
) -> Result<InboxMessage, InboxError> {
    if teacher.role != ParticipantRole::Teacher {
        return Err(InboxError::Invalid(format!(
            "notifications are sent by teachers, not {}",
            teacher.role.as_str()
        )));
    }
    let notes = notes.trim();
    if notes.is_empty() {
        return Err(InboxError::EmptyBody);
    }

    let mut body = notes.to_string();
    // Treatment only applies to incidents.
    if kind == NotificationKind::Incident
        && let Some(treatment) = treatment_given.map(str::trim).filter(|t| !t.is_empty())
    {
        body.push_str(&format!("\nTreatment Given: {}", treatment));
    }
    body.push_str(&format!("\n---\nFrom: {}", teacher.name));

    Ok(new_message(
        MessageKind::Notification,
        format!("{}: {}", kind.as_str(), child_name.trim()),
        body,
        teacher,
        parent,
        now,
    ))
}
