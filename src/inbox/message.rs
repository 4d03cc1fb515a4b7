use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::viewer::Viewer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Parent,
    Admin,
    Teacher,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Parent => "parent",
            ParticipantRole::Admin => "admin",
            ParticipantRole::Teacher => "teacher",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "parent" => Some(ParticipantRole::Parent),
            "admin" => Some(ParticipantRole::Admin),
            "teacher" => Some(ParticipantRole::Teacher),
            _ => None,
        }
    }

    /// Document field holding this role's read flag.
    pub fn read_flag_field(&self) -> &'static str {
        match self {
            ParticipantRole::Parent => "isReadByParent",
            ParticipantRole::Admin => "isReadByAdmin",
            ParticipantRole::Teacher => "isReadByTeacher",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadFlags {
    pub parent: bool,
    pub admin: bool,
    pub teacher: bool,
}

impl ReadFlags {
    pub fn read_by(role: ParticipantRole) -> Self {
        let mut flags = Self::default();
        flags.set(role, true);
        flags
    }

    pub fn is_read_by(&self, role: ParticipantRole) -> bool {
        match role {
            ParticipantRole::Parent => self.parent,
            ParticipantRole::Admin => self.admin,
            ParticipantRole::Teacher => self.teacher,
        }
    }

    pub fn set(&mut self, role: ParticipantRole, value: bool) {
        match role {
            ParticipantRole::Parent => self.parent = value,
            ParticipantRole::Admin => self.admin = value,
            ParticipantRole::Teacher => self.teacher = value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageKind {
    Absence,
    Reply,
    Notification,
    #[default]
    General,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Absence => "absence",
            MessageKind::Reply => "reply",
            MessageKind::Notification => "notification",
            MessageKind::General => "general",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "absence" => MessageKind::Absence,
            "reply" => MessageKind::Reply,
            "notification" => MessageKind::Notification,
            _ => MessageKind::General,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboxMessage {
    pub id: String,
    pub thread_id: Option<String>,
    pub kind: MessageKind,
    pub subject: String,
    pub body: String,
    pub sender: Participant,
    pub recipient: Participant,
    pub created_at: DateTime<Utc>,
    pub read: ReadFlags,
}

impl InboxMessage {
    /// The thread id, or the message's own id for a thread root.
    pub fn thread_key(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.id)
    }

    pub fn is_addressed_to(&self, viewer: &Viewer) -> bool {
        self.recipient.id == viewer.id
    }

    pub fn is_unread_for(&self, viewer: &Viewer) -> bool {
        self.is_addressed_to(viewer) && !self.read.is_read_by(viewer.role)
    }
}
