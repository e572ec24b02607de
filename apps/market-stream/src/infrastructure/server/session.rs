//! Downstream WebSocket Session
//!
//! One reader loop and one writer task per client. The reader parses
//! requests and routes them through the supervisor; the writer drains the
//! client's outbound queue onto the socket. Acks and errors share that
//! queue with market data so ordering per client is preserved.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use super::ServerState;
use super::protocol::{ClientMessage, ServerMessage};
use crate::domain::streaming::Symbol;
use crate::domain::subscription::ConnectionId;
use crate::infrastructure::broadcast::{Broadcaster, ClientHandle, ClientOutbox, Outbound};
use crate::infrastructure::metrics::{self, EvictionReason};

/// Close reason sent with an eviction.
pub const SLOW_CONSUMER_REASON: &str = "slow consumer";

/// How long the writer may keep flushing after the reader exits.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Upgrade handler for `/api/market/ws` and `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

async fn run_session(socket: WebSocket, state: Arc<ServerState>) {
    let (handle, outbox) = ClientHandle::channel(state.queue_capacity());
    let supervisor = Arc::clone(state.supervisor());

    let id = match supervisor.open_connection(handle.clone()) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "Failed to register client");
            return;
        }
    };
    metrics::set_downstream_connections(supervisor.client_count());

    let (sink, mut stream) = socket.split();
    let writer_done = CancellationToken::new();
    let mut writer = tokio::spawn(write_loop(
        sink,
        outbox,
        id,
        Arc::clone(state.broadcaster()),
        writer_done.clone(),
    ));
    let shutdown = supervisor.cancel_token().clone();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = writer_done.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let reply = respond(&state, id, text.as_str()).await;
                    queue_reply(&handle, id, &reply).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection = %id, error = %e, "Client read failed");
                    break;
                }
            },
        }
    }

    supervisor.close_connection(id);
    metrics::set_downstream_connections(supervisor.client_count());
    drop(handle);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

/// Turn one client frame into its reply.
pub(crate) async fn respond(state: &ServerState, id: ConnectionId, text: &str) -> ServerMessage {
    let request = match ClientMessage::parse(text) {
        Ok(request) => request,
        Err(message) => {
            tracing::debug!(connection = %id, error = %message, "Rejected client request");
            return ServerMessage::error(message);
        }
    };

    let supervisor = state.supervisor();
    match request {
        ClientMessage::Subscribe {
            symbols,
            asset_type,
        } => match supervisor.subscribe(id, asset_type, &symbols).await {
            Ok(symbols) => ServerMessage::Subscribed { symbols },
            Err(e) => ServerMessage::error(e.to_string()),
        },
        ClientMessage::Unsubscribe { symbols } => match supervisor.unsubscribe(id, &symbols) {
            Ok(symbols) => ServerMessage::Unsubscribed { symbols },
            Err(e) => ServerMessage::error(e.to_string()),
        },
    }
}

async fn queue_reply(handle: &ClientHandle, id: ConnectionId, reply: &ServerMessage) {
    let json = match reply.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(connection = %id, error = %e, "Failed to serialize reply");
            return;
        }
    };
    if handle.send(json.into()).await.is_err() {
        tracing::debug!(connection = %id, "Reply dropped, writer gone");
    }
}

// =============================================================================
// Writer
// =============================================================================

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: ClientOutbox,
    id: ConnectionId,
    broadcaster: Arc<Broadcaster>,
    done: CancellationToken,
) {
    let _done = done.drop_guard();

    loop {
        match outbox.next().await {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(Message::Text((&*frame).into())).await {
                    tracing::debug!(connection = %id, error = %e, "Client write failed");
                    broadcaster.evict(id, EvictionReason::WriteFailed);
                    return;
                }
            }
            Outbound::Evicted(symbols) => {
                send_eviction(&mut sink, id, symbols).await;
                return;
            }
            Outbound::Closed => {
                let _ = sink.close().await;
                return;
            }
        }
    }
}

async fn send_eviction(
    sink: &mut SplitSink<WebSocket, Message>,
    id: ConnectionId,
    symbols: Vec<Symbol>,
) {
    if let Ok(json) = (ServerMessage::Unsubscribed { symbols }).to_json() {
        let _ = sink.send(Message::Text(json.into())).await;
    }
    let close = Message::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: SLOW_CONSUMER_REASON.into(),
    }));
    if let Err(e) = sink.send(close).await {
        tracing::debug!(connection = %id, error = %e, "Eviction close failed");
    }
}
