pub mod config;
pub mod records;
pub mod rest;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::calendar::CalendarEvent;
use crate::inbox::{InboxMessage, ParticipantRole};
use config::{StoreBackend, StoreConfig};
use records::ValidationError;
use rest::RestDocumentStore;
use sqlite::SqliteStore;

pub const EVENTS_COLLECTION: &str = "calendarEvents";
pub const MESSAGES_COLLECTION: &str = "inboxMessages";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Request error: {0}")]
    RequestError(String),
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Invalid record: {0}")]
    Invalid(#[from] ValidationError),
    #[error("Store connection lock poisoned")]
    LockPoisoned,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn list_events(&self) -> Result<Vec<CalendarEvent>, StoreError>;

    async fn get_event(&self, id: &str) -> Result<Option<CalendarEvent>, StoreError>;

    async fn put_event(&self, event: &CalendarEvent) -> Result<(), StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages the user sent or received.
    async fn list_messages_for_user(&self, user_id: &str) -> Result<Vec<InboxMessage>, StoreError>;

    async fn append_message(&self, message: &InboxMessage) -> Result<String, StoreError>;

    async fn set_read_flag(
        &self,
        message_id: &str,
        role: ParticipantRole,
        value: bool,
    ) -> Result<(), StoreError>;
}

pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub messages: Arc<dyn MessageStore>,
}

pub fn open_stores(config: &StoreConfig) -> Result<Stores, StoreError> {
    match config.backend {
        StoreBackend::Sqlite => {
            tracing::info!("Opening SQLite store at {}", config.sqlite_path.display());
            let store = Arc::new(SqliteStore::open(&config.sqlite_path)?);
            Ok(Stores {
                events: store.clone(),
                messages: store,
            })
        }
        StoreBackend::Rest => {
            tracing::info!("Using REST document store at {}", config.rest_base_url);
            let mut store = RestDocumentStore::new(config.rest_base_url.clone());
            if let Some(token) = &config.api_token {
                store = store.with_api_token(token.clone());
            }
            let store = Arc::new(store);
            Ok(Stores {
                events: store.clone(),
                messages: store,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn sqlite_backend_serves_both_stores() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::Sqlite,
            sqlite_path: temp_dir.path().join("data").join("portal.db"),
            rest_base_url: String::new(),
            api_token: None,
        };

        let stores = open_stores(&config).unwrap();

        let events = tokio_test::block_on(stores.events.list_events()).unwrap();
        let messages = tokio_test::block_on(stores.messages.list_messages_for_user("parent-1")).unwrap();
        assert!(events.is_empty());
        assert!(messages.is_empty());
        assert!(config.sqlite_path.exists());
    }

    #[test]
    fn rest_backend_opens_without_network() {
        let config = StoreConfig {
            backend: StoreBackend::Rest,
            sqlite_path: PathBuf::from("unused.db"),
            rest_base_url: "http://localhost:9".to_string(),
            api_token: Some("token".to_string()),
        };

        assert!(open_stores(&config).is_ok());
    }
}
