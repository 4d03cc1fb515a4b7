use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::inbox::compose;
use crate::inbox::message::InboxMessage;
use crate::inbox::threads::{Thread, build_threads};
use crate::storage::{MessageStore, StoreError};
use crate::viewer::Viewer;

const RETRY_BACKOFF_MS: u64 = 50;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),
    #[error("Thread {0} has no other participant to reply to")]
    NoCounterpart(String),
    #[error("Message body is empty")]
    EmptyBody,
    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// Result of opening a thread. Local read state is already updated for every
/// id in `marked`; `failed` lists the writes that never reached the store.
#[derive(Debug, Default)]
pub struct MarkReadOutcome {
    pub marked: Vec<String>,
    pub failed: Vec<(String, StoreError)>,
}

impl MarkReadOutcome {
    pub fn is_fully_persisted(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct InboxService {
    store: Arc<dyn MessageStore>,
    retries: u32,
}

impl InboxService {
    pub fn new(store: Arc<dyn MessageStore>, retries: u32) -> Self {
        Self { store, retries }
    }

    pub async fn threads_for(&self, viewer: &Viewer) -> Result<Vec<Thread>, InboxError> {
        let messages = self.store.list_messages_for_user(&viewer.id).await?;
        tracing::info!("Loaded {} messages for {}", messages.len(), viewer.id);
        Ok(build_threads(messages))
    }

    pub fn find_thread<'a>(threads: &'a mut [Thread], key: &str) -> Result<&'a mut Thread, InboxError> {
        threads
            .iter_mut()
            .find(|thread| thread.key() == key)
            .ok_or_else(|| InboxError::ThreadNotFound(key.to_string()))
    }

    /// Marks the thread read for the viewer, then persists each changed flag.
    /// Store failures never undo the local change.
    pub async fn open_thread(&self, thread: &mut Thread, viewer: &Viewer) -> MarkReadOutcome {
        let marked = thread.mark_read(viewer);
        let mut outcome = MarkReadOutcome {
            marked: Vec::with_capacity(marked.len()),
            failed: Vec::new(),
        };

        for message_id in marked {
            if let Err(e) = self.persist_read_flag(&message_id, viewer).await {
                tracing::error!("Could not persist read flag for {}: {}", message_id, e);
                outcome.failed.push((message_id.clone(), e));
            }
            outcome.marked.push(message_id);
        }

        outcome
    }

    async fn persist_read_flag(&self, message_id: &str, viewer: &Viewer) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            match self.store.set_read_flag(message_id, viewer.role, true).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Marking {} read failed ({}), retry {}/{}",
                        message_id,
                        e,
                        attempt,
                        self.retries
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stores a reply from the viewer and appends it to the thread.
    pub async fn reply(
        &self,
        thread: &mut Thread,
        viewer: &Viewer,
        body: &str,
    ) -> Result<InboxMessage, InboxError> {
        let message = compose::reply(thread, &viewer.as_participant(), body, Utc::now())?;
        let message = self.send(message).await?;
        thread.push(message.clone());
        Ok(message)
    }

    /// Appends a composed message, adopting the id the store assigns.
    pub async fn send(&self, mut message: InboxMessage) -> Result<InboxMessage, InboxError> {
        if message.recipient.id.trim().is_empty() {
            return Err(InboxError::Invalid("message has no recipient".to_string()));
        }
        let id = self.store.append_message(&message).await?;
        tracing::info!("Sent {} message {} to {}", message.kind.as_str(), id, message.recipient.id);
        message.id = id;
        Ok(message)
    }
}
