pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;

use crate::storage::EventStore;
use crate::storage::config::CalendarConfig;

pub struct FeedState {
    pub events: Arc<dyn EventStore>,
    pub calendar: CalendarConfig,
}

pub fn create_router(state: Arc<FeedState>) -> Router {
    Router::new()
        .route("/api/calendar", get(handlers::calendar_feed))
        .with_state(state)
}

pub async fn serve(bind: &str, state: Arc<FeedState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!("Serving calendar feed on http://{}/api/calendar", listener.local_addr()?);
    axum::serve(listener, create_router(state)).await
}
