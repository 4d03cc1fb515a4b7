use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use uuid::Uuid;

use crate::calendar::CalendarEvent;
use crate::inbox::{InboxMessage, ParticipantRole};
use crate::storage::records::{EventRecord, MessageRecord, format_timestamp};
use crate::storage::{EventStore, MessageStore, StoreError};

/// Local document store. Each row keeps the JSON document plus the columns
/// needed to query it.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::RequestError(format!("Cannot create {}: {}", parent.display(), e)))?;
        }
        let store = Self::new(Connection::open(path)?);
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self::new(Connection::open_in_memory()?);
        store.initialize()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                start_date TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                thread_key TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS messages_by_participant
             ON messages (sender_id, recipient_id)",
            [],
        )?;

        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        let Ok(conn) = self.lock() else { return false };
        let result: SqliteResult<i32> = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        );
        result.unwrap_or(0) > 0
    }

    fn load_event_documents(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT data FROM events ORDER BY start_date, id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<SqliteResult<Vec<String>>>()?)
    }

    fn load_message_documents(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT data FROM messages
             WHERE sender_id = ?1 OR recipient_id = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([user_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<SqliteResult<Vec<String>>>()?)
    }
}

fn decode_event(document: &str) -> Result<CalendarEvent, StoreError> {
    let record: EventRecord = serde_json::from_str(document)?;
    Ok(CalendarEvent::try_from(record)?)
}

fn decode_message(document: &str) -> Result<InboxMessage, StoreError> {
    let record: MessageRecord = serde_json::from_str(document)?;
    Ok(InboxMessage::try_from(record)?)
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn list_events(&self) -> Result<Vec<CalendarEvent>, StoreError> {
        let documents = self.load_event_documents()?;
        let events: Vec<CalendarEvent> = documents
            .iter()
            .filter_map(|document| match decode_event(document) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("Skipping invalid event document: {}", e);
                    None
                }
            })
            .collect();
        tracing::debug!("Loaded {} events from SQLite", events.len());
        Ok(events)
    }

    async fn get_event(&self, id: &str) -> Result<Option<CalendarEvent>, StoreError> {
        let document: Option<String> = {
            let conn = self.lock()?;
            conn.query_row("SELECT data FROM events WHERE id = ?1", [id], |row| row.get(0))
                .optional()?
        };
        document.as_deref().map(decode_event).transpose()
    }

    async fn put_event(&self, event: &CalendarEvent) -> Result<(), StoreError> {
        let data = serde_json::to_string(&EventRecord::from(event))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO events (id, data, start_date) VALUES (?1, ?2, ?3)",
            rusqlite::params![&event.id, &data, format_timestamp(event.start)],
        )?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn list_messages_for_user(&self, user_id: &str) -> Result<Vec<InboxMessage>, StoreError> {
        let documents = self.load_message_documents(user_id)?;
        let messages = documents
            .iter()
            .filter_map(|document| match decode_message(document) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!("Skipping invalid message document: {}", e);
                    None
                }
            })
            .collect();
        Ok(messages)
    }

    async fn append_message(&self, message: &InboxMessage) -> Result<String, StoreError> {
        let mut record = MessageRecord::from(message);
        if record.id.trim().is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        let id = record.id.clone();
        let thread_key = message.thread_id.clone().unwrap_or_else(|| id.clone());
        let data = serde_json::to_string(&record)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO messages (id, thread_key, sender_id, recipient_id, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                &id,
                &thread_key,
                &message.sender.id,
                &message.recipient.id,
                &data,
                format_timestamp(message.created_at),
            ],
        )?;
        tracing::info!("Appended message {} to thread {}", id, thread_key);
        Ok(id)
    }

    async fn set_read_flag(
        &self,
        message_id: &str,
        role: ParticipantRole,
        value: bool,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let document: Option<String> = conn
            .query_row("SELECT data FROM messages WHERE id = ?1", [message_id], |row| row.get(0))
            .optional()?;
        let Some(document) = document else {
            return Err(StoreError::NotFound(message_id.to_string()));
        };

        let mut record: serde_json::Value = serde_json::from_str(&document)?;
        let Some(fields) = record.as_object_mut() else {
            return Err(StoreError::RequestError(format!(
                "Message {} is not a JSON object",
                message_id
            )));
        };
        fields.insert(role.read_flag_field().to_string(), serde_json::Value::Bool(value));
        conn.execute(
            "UPDATE messages SET data = ?1 WHERE id = ?2",
            rusqlite::params![serde_json::to_string(&record)?, message_id],
        )?;
        Ok(())
    }
}
