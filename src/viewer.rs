use crate::calendar::RelevanceLabel;
use crate::inbox::{Participant, ParticipantRole};

/// Who is looking at the calendar or inbox. Passed into every call that
/// depends on the current user.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: ParticipantRole,
    pub year_groups: Vec<RelevanceLabel>,
}

impl Viewer {
    pub fn new(id: impl Into<String>, role: ParticipantRole) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            email: String::new(),
            role,
            year_groups: Vec::new(),
        }
    }

    pub fn with_contact(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.name = name.into();
        self.email = email.into();
        self
    }

    pub fn with_year_groups(mut self, year_groups: Vec<RelevanceLabel>) -> Self {
        self.year_groups = year_groups;
        self
    }

    pub fn as_participant(&self) -> Participant {
        Participant {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
        }
    }
}
