//! ConnectHandler - control WebSocket transport
//!
//! Each socket gets one reader loop driving a [`ControlSession`] and one writer task
//! that owns the sink. Everything the relay sends on the socket goes through the
//! writer's queue, so frames from concurrent dispatches never interleave.

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};
use tunnel_relay_common::Message;
use tunnel_relay_common::constants::OUTBOUND_QUEUE_DEPTH;

use crate::RelayState;
use crate::control::{ControlSession, Flow};

/// Upgrade a control-port request into a tunnel session
pub async fn control_upgrade(ws: WebSocketUpgrade, State(relay): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| serve_control_socket(socket, relay))
}

pub async fn serve_control_socket(socket: WebSocket, relay: RelayState) {
    let (sink, mut stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    let (close_tx, mut close_rx) = watch::channel(false);

    let auth_timeout = relay.config.auth_timeout;
    let mut session = ControlSession::new(relay, outbound_tx, close_tx);
    let writer = tokio::spawn(write_frames(sink, outbound_rx, close_rx.clone()));

    let auth_deadline = tokio::time::sleep(auth_timeout);
    tokio::pin!(auth_deadline);

    loop {
        let flow = tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => session.on_text(text.as_str()).await,
                Some(Ok(WsMessage::Binary(_))) => session.on_malformed("binary frame"),
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => Flow::Continue,
                Some(Ok(WsMessage::Close(_))) | None => Flow::Close,
                Some(Err(e)) => {
                    debug!("Control socket error: {}", e);
                    Flow::Close
                }
            },
            _ = &mut auth_deadline, if !session.is_authenticated() => {
                warn!("No auth frame within {:?}, closing connection", auth_timeout);
                Flow::Close
            }
            _ = close_rx.changed() => Flow::Close,
        };

        if flow == Flow::Close {
            break;
        }
    }

    session.on_close();
    drop(session);

    if let Err(e) = writer.await {
        error!("Control writer task failed: {}", e);
    }
}

/// Drain the outbound queue onto the socket until the connection is closed
async fn write_frames(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Message>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode {} frame: {}", frame.kind(), e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                    debug!("Failed to write control frame: {}", e);
                    break;
                }
            }
            _ = closed.changed() => break,
        }
    }

    let _ = sink.send(WsMessage::Close(None)).await;
    let _ = sink.close().await;
    debug!("Control writer exiting");
}
