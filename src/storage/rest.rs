use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::calendar::CalendarEvent;
use crate::inbox::{InboxMessage, ParticipantRole};
use crate::storage::records::{EventRecord, MessageRecord, ValidationError};
use crate::storage::{EVENTS_COLLECTION, EventStore, MESSAGES_COLLECTION, MessageStore, StoreError};

#[derive(Debug, Deserialize)]
struct DocumentListResponse {
    documents: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct CreatedDocument {
    id: String,
}

/// Client for a JSON document service exposing
/// `/collections/{collection}/documents[/{id}]`.
pub struct RestDocumentStore {
    base_url: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl RestDocumentStore {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_token(mut self, api_token: String) -> Self {
        self.api_token = Some(api_token);
        self
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}/documents", self.base_url, collection)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.collection_url(collection), urlencoding::encode(id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(&self, response: Response, target: &str) -> Result<Response, StoreError> {
        let status = response.status();
        tracing::debug!("Document store responded {} for {}", status, target);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::error!("Authentication failed for {}", target);
            return Err(StoreError::AuthenticationFailed);
        }

        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(target.to_string()));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!("Rate limit exceeded for {}", target);
            return Err(StoreError::RateLimited);
        }

        if !status.is_success() {
            let body = response.text().await?;
            tracing::error!("Request for {} failed. Status: {}, Body: {}", target, status, body);
            return Err(StoreError::RequestError(format!("Status {}: {}", status, body)));
        }

        Ok(response)
    }

    /// Decodes each document on its own so one bad record does not hide the rest.
    fn decode_documents<R, T>(documents: Vec<serde_json::Value>, kind: &str) -> Vec<T>
    where
        R: DeserializeOwned,
        T: TryFrom<R, Error = ValidationError>,
    {
        documents
            .into_iter()
            .filter_map(|document| {
                let decoded = serde_json::from_value::<R>(document)
                    .map_err(StoreError::from)
                    .and_then(|record| T::try_from(record).map_err(StoreError::from));
                match decoded {
                    Ok(item) => Some(item),
                    Err(e) => {
                        tracing::warn!("Skipping invalid {} document: {}", kind, e);
                        None
                    }
                }
            })
            .collect()
    }

    async fn fetch_documents(
        &self,
        collection: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let url = self.collection_url(collection);
        let response = self
            .authorize(self.client.get(&url).query(query))
            .send()
            .await?;
        let response = self.check_status(response, collection).await?;
        let list: DocumentListResponse = response.json().await?;
        Ok(list.documents.unwrap_or_default())
    }
}

#[async_trait]
impl EventStore for RestDocumentStore {
    async fn list_events(&self) -> Result<Vec<CalendarEvent>, StoreError> {
        tracing::info!("Fetching calendar events from document store");
        let documents = self.fetch_documents(EVENTS_COLLECTION, &[]).await?;
        let events: Vec<CalendarEvent> = Self::decode_documents::<EventRecord, _>(documents, "event");
        tracing::info!("Fetched {} events successfully", events.len());
        Ok(events)
    }

    async fn get_event(&self, id: &str) -> Result<Option<CalendarEvent>, StoreError> {
        let url = self.document_url(EVENTS_COLLECTION, id);
        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = match self.check_status(response, id).await {
            Ok(response) => response,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let record: EventRecord = response.json().await?;
        Ok(Some(CalendarEvent::try_from(record)?))
    }

    async fn put_event(&self, event: &CalendarEvent) -> Result<(), StoreError> {
        let url = self.document_url(EVENTS_COLLECTION, &event.id);
        tracing::info!("Storing event {}", event.id);
        let response = self
            .authorize(self.client.put(&url).json(&EventRecord::from(event)))
            .send()
            .await?;
        self.check_status(response, &event.id).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for RestDocumentStore {
    async fn list_messages_for_user(&self, user_id: &str) -> Result<Vec<InboxMessage>, StoreError> {
        let documents = self
            .fetch_documents(MESSAGES_COLLECTION, &[("participant", user_id)])
            .await?;
        Ok(Self::decode_documents::<MessageRecord, _>(documents, "message"))
    }

    async fn append_message(&self, message: &InboxMessage) -> Result<String, StoreError> {
        let url = self.collection_url(MESSAGES_COLLECTION);
        let response = self
            .authorize(self.client.post(&url).json(&MessageRecord::from(message)))
            .send()
            .await?;
        let response = self.check_status(response, MESSAGES_COLLECTION).await?;
        let created: CreatedDocument = response.json().await?;
        tracing::info!("Message stored with id {}", created.id);
        Ok(created.id)
    }

    async fn set_read_flag(
        &self,
        message_id: &str,
        role: ParticipantRole,
        value: bool,
    ) -> Result<(), StoreError> {
        let url = self.document_url(MESSAGES_COLLECTION, message_id);
        let patch = serde_json::json!({ role.read_flag_field(): value });
        let response = self
            .authorize(self.client.patch(&url).json(&patch))
            .send()
            .await?;
        self.check_status(response, message_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::LocalizedText;
    use crate::inbox::{MessageKind, Participant, ReadFlags};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event_document(id: &str, start: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title_en": "Parents Evening",
            "title_cy": "Noson Rieni",
            "description_en": "Meet your child's teacher.",
            "start": start,
            "tags": ["Parents Evening"],
            "relevantTo": ["All"]
        })
    }

    fn message_document(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "type": "general",
            "subject": "Welcome",
            "body": "Welcome to the new term.",
            "sender": {"id": "admin-1", "name": "School Admin", "email": "admin@example.com", "type": "admin"},
            "recipient": {"id": "parent-1", "name": "Jane Doe", "email": "parent@example.com", "type": "parent"},
            "createdAt": "2025-04-08T09:00:00Z"
        })
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let store = RestDocumentStore::new("http://localhost:8080/".to_string());

        assert_eq!(
            store.document_url(MESSAGES_COLLECTION, "a b"),
            "http://localhost:8080/collections/inboxMessages/documents/a%20b"
        );
    }

    #[tokio::test]
    async fn lists_events_and_skips_invalid_documents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/calendarEvents/documents"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [
                    event_document("e1", "2025-04-08T18:00"),
                    event_document("e2", "not a date"),
                    {"unexpected": true}
                ]
            })))
            .mount(&server)
            .await;

        let store = RestDocumentStore::new(server.uri()).with_api_token("secret".to_string());
        let events = store.list_events().await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "e1");
    }

    #[tokio::test]
    async fn missing_event_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/calendarEvents/documents/nope"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = RestDocumentStore::new(server.uri());

        assert_eq!(store.get_event("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_error_surfaces_as_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/calendarEvents/documents"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let store = RestDocumentStore::new(server.uri());
        let result = store.list_events().await;

        assert!(matches!(result, Err(StoreError::RequestError(body)) if body.contains("maintenance")));
    }

    #[tokio::test]
    async fn unauthorized_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = RestDocumentStore::new(server.uri());

        assert!(matches!(
            store.list_messages_for_user("parent-1").await,
            Err(StoreError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn lists_messages_for_participant() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/inboxMessages/documents"))
            .and(query_param("participant", "parent-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [message_document("m1")]
            })))
            .mount(&server)
            .await;

        let store = RestDocumentStore::new(server.uri());
        let messages = store.list_messages_for_user("parent-1").await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].recipient.id, "parent-1");
    }

    #[tokio::test]
    async fn append_returns_server_assigned_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/inboxMessages/documents"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "srv-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let message = InboxMessage {
            id: "local-1".to_string(),
            thread_id: None,
            kind: MessageKind::Absence,
            subject: "Absence Report for Tom".to_string(),
            body: "Unwell".to_string(),
            sender: Participant {
                id: "parent-1".to_string(),
                name: "Jane Doe".to_string(),
                email: "parent@example.com".to_string(),
                role: ParticipantRole::Parent,
            },
            recipient: Participant {
                id: "admin-1".to_string(),
                name: "School Admin".to_string(),
                email: "admin@example.com".to_string(),
                role: ParticipantRole::Admin,
            },
            created_at: Utc.with_ymd_and_hms(2025, 4, 8, 8, 0, 0).unwrap(),
            read: ReadFlags::read_by(ParticipantRole::Parent),
        };

        let store = RestDocumentStore::new(server.uri());
        let id = store.append_message(&message).await.unwrap();

        assert_eq!(id, "srv-1");
    }

    #[tokio::test]
    async fn read_flag_patch_names_the_role_field() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/collections/inboxMessages/documents/m1"))
            .and(body_json(json!({"isReadByAdmin": true})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = RestDocumentStore::new(server.uri());

        store.set_read_flag("m1", ParticipantRole::Admin, true).await.unwrap();
    }

    #[tokio::test]
    async fn put_event_sends_record_document() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/calendarEvents/documents/e1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let event = CalendarEvent::new(
            "e1",
            LocalizedText::english("Open Evening"),
            Utc.with_ymd_and_hms(2025, 6, 12, 17, 0, 0).unwrap(),
        );
        let store = RestDocumentStore::new(server.uri());

        store.put_event(&event).await.unwrap();
    }
}
