use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const ALL: &str = "All";

/// Audience label on a calendar event: a year group such as `Year3`, or `All`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelevanceLabel(String);

impl RelevanceLabel {
    /// Normalizes `6`, `Year 6`, `yr6` and `Y6` to `Year6`, and any casing of
    /// `all` to `All`. Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        static YEAR_GROUP_RE: OnceLock<Regex> = OnceLock::new();
        let year_group = YEAR_GROUP_RE.get_or_init(|| {
            Regex::new(r"(?i)^(?:year|yr|y)?\s*(\d{1,2})$").expect("invalid year group regex")
        });

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.eq_ignore_ascii_case(ALL) {
            return Some(Self::all());
        }
        if let Some(year) = year_group
            .captures(trimmed)
            .and_then(|caps| caps[1].parse::<u8>().ok())
        {
            return Some(Self::year(year));
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn all() -> Self {
        Self(ALL.to_string())
    }

    pub fn year(year: u8) -> Self {
        Self(format!("Year{}", year))
    }

    pub fn is_all(&self) -> bool {
        self.0 == ALL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelevanceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RelevanceLabel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| "relevance label must not be blank".to_string())
    }
}

impl From<RelevanceLabel> for String {
    fn from(label: RelevanceLabel) -> Self {
        label.0
    }
}
