//! `/updates` push channel

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{Sink, SinkExt, StreamExt};

use crate::session::Session;
use crate::updates::Observer;

/// A peer that accepts nothing for this long is dropped
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Subscribe before the upgrade completes, so a client that sees the
/// handshake succeed never misses a later update
pub(super) async fn updates(ws: WebSocketUpgrade, State(session): State<Arc<Session>>) -> Response {
    let observer = session.subscribe();
    ws.on_upgrade(move |socket| push_updates(socket, observer))
}

/// Send one frame, giving up after `limit`. Returns false if the peer is
/// gone or stalled.
async fn send_within<S>(sender: &mut S, message: Message, limit: Duration) -> bool
where
    S: Sink<Message> + Unpin,
{
    match tokio::time::timeout(limit, sender.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => false,
        Err(_) => {
            tracing::warn!(timeout = ?limit, "observer stopped reading, disconnecting");
            false
        }
    }
}

/// Forward updates until either side goes away. Client frames are ignored
/// apart from close.
async fn push_updates(socket: WebSocket, mut observer: Observer) {
    let id = observer.id();
    tracing::debug!(observer = id, "observer connected");
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;
            update = observer.recv() => match update {
                Some(message) => {
                    let frame = Message::Text(message.to_json_string());
                    if !send_within(&mut sender, frame, SEND_TIMEOUT).await {
                        break;
                    }
                }
                None => {
                    // session closed or the observer fell too far behind
                    send_within(&mut sender, Message::Close(None), SEND_TIMEOUT).await;
                    break;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }
    tracing::debug!(observer = id, "observer disconnected");
}
