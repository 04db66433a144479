//! WebSocket upgrade surface for subscriber sessions

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use services_common::MarketCache;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::stream::{StreamKind, run_session};

/// Shared state handed to every session
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<MarketCache>,
    pub exchanges: Arc<Vec<String>>,
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:kind/:symbol", get(subscribe))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn subscribe(
    ws: WebSocketUpgrade,
    Path((kind, symbol)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let Some(kind) = StreamKind::parse(&kind) else {
        debug!(%kind, "rejecting unknown stream kind");
        return (StatusCode::BAD_REQUEST, "unknown stream kind").into_response();
    };

    ws.on_upgrade(move |socket| {
        run_session(
            socket,
            kind,
            symbol,
            state.cache,
            (*state.exchanges).clone(),
            state.shutdown,
        )
    })
}
