mod handlers;
mod router;

pub use router::build_api_router;

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use crate::core::dispatch::JobDispatcher;
use crate::core::heartbeat::ClusterHeartbeatMonitor;
use crate::core::runtime::JobRuntime;
use crate::core::store::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub store: SessionStore,
    pub dispatcher: Arc<JobDispatcher>,
    pub runtime: Arc<dyn JobRuntime>,
    pub heartbeat: Arc<ClusterHeartbeatMonitor>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
}

impl AppState {
    pub fn new(
        store: SessionStore,
        dispatcher: Arc<JobDispatcher>,
        runtime: Arc<dyn JobRuntime>,
        heartbeat: Arc<ClusterHeartbeatMonitor>,
        log_tx: tokio::sync::broadcast::Sender<String>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            runtime,
            heartbeat,
            log_tx,
        }
    }
}

// --- SSE log tail (used by router) ---

pub(crate) async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });
    Sse::new(stream)
}
