use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use conduit::agent::{AgentRequest, TurnOutcome};
use conduit::events::AgentEvent;
use futures::{
    stream::{BoxStream, StreamExt},
    Stream,
};
use http::header;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// An event stream body fed from a channel
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            Body::from_stream(self),
        )
            .into_response()
    }
}

// Forward encoded events until the turn ends or the client goes away
async fn forward(mut events: BoxStream<'static, AgentEvent>, tx: mpsc::Sender<String>) {
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    if tx.send(event.encode()).await.is_err() {
                        tracing::info!("client disconnected, abandoning turn");
                        break;
                    }
                }
                None => break,
            },
            _ = tx.closed() => {
                tracing::info!("client disconnected, abandoning turn");
                break;
            }
        }
    }
}

async fn handler(
    State(state): State<AppState>,
    Json(request): Json<AgentRequest>,
) -> Result<SseResponse, ApiError> {
    // Configuration problems are answered before the stream starts
    let turn = state.agent.start_turn(request).await?;

    let (tx, rx) = mpsc::channel(100);
    tokio::spawn(forward(turn.stream(), tx));

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

// Run a whole turn and answer with the aggregate, non streaming
async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AgentRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    Ok(Json(state.agent.ask(request).await?))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/reply", post(handler))
        .route("/ask", post(ask_handler))
        .with_state(state)
}
