use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::calendar::{FeedEncoder, IcalError, sorted_events};
use crate::server::FeedState;
use crate::storage::StoreError;

const CALENDAR_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";
const NO_CACHE: &str = "no-store, no-cache, must-revalidate, proxy-revalidate";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Failed to load events: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to encode feed: {0}")]
    Encode(#[from] IcalError),
}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        tracing::error!("Calendar feed failed: {}", self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Error generating iCal feed",
        )
            .into_response()
    }
}

/// `GET /api/calendar`: every event, unfiltered, as one iCalendar document.
pub async fn calendar_feed(State(state): State<Arc<FeedState>>) -> Result<Response, FeedError> {
    let events = sorted_events(state.events.list_events().await?);

    let body = FeedEncoder::from_config(&state.calendar).encode(&events)?;
    tracing::info!("Served calendar feed with {} events", events.len());

    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CALENDAR_CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    Ok(response)
}
