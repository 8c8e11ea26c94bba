//! Manages the WebSocket connection lifecycle for a voice session.

use super::{
    engines::{RemoteCaptureEngine, RemotePlaybackEngine},
    protocol::{ClientMessage, ServerMessage},
};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use charla_core::engine::{CaptureEvent, PlaybackEvent, playback_channel};
use charla_core::session::{SessionClosed, SessionEvent, SessionHandle, SessionOrchestrator};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Runs one session for the lifetime of the connection.
#[instrument(name = "ws_session", skip_all, fields(connection_id = %Uuid::new_v4()))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New WebSocket connection.");
    let (socket_tx, socket_rx) = socket.split();

    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let (playback_tx, playback_rx) = playback_channel();
    let capture = Arc::new(RemoteCaptureEngine::new(outbox_tx.clone()));
    let playback = Arc::new(RemotePlaybackEngine::new(outbox_tx, playback_tx));

    let (handle, inbox) = SessionHandle::new();
    let events = handle.subscribe();
    let orchestrator = SessionOrchestrator::new(
        (*state.session_config).clone(),
        capture,
        playback.clone(),
        playback_rx,
        state.completion.clone(),
        &handle,
    );
    let session_task = tokio::spawn(orchestrator.run(inbox).in_current_span());

    if let Err(e) = bridge(socket_tx, socket_rx, outbox_rx, events, &handle, &playback).await {
        error!(error = ?e, "WebSocket session terminated with error.");
    }

    let _ = handle.shutdown();
    if let Err(e) = session_task.await {
        error!(error = ?e, "Session task failed.");
    }
    info!("WebSocket connection closed and session terminated.");
}

/// Shuttles messages between the socket and the session until either side
/// goes away.
async fn bridge(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
    mut outbox: mpsc::UnboundedReceiver<ServerMessage>,
    mut events: broadcast::Receiver<SessionEvent>,
    handle: &SessionHandle,
    playback: &RemotePlaybackEngine,
) -> Result<()> {
    loop {
        tokio::select! {
            msg_result = socket_rx.next() => match msg_result {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => {
                            if dispatch(msg, handle, playback).is_err() {
                                warn!("Session ended while the client was still connected.");
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed client message."),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client closed the connection.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Error receiving from client WebSocket: {:?}", e);
                    break;
                }
            },
            Some(command) = outbox.recv() => {
                send_msg(&mut socket_tx, command).await?;
            },
            event = events.recv() => match event {
                Ok(event) => send_msg(&mut socket_tx, ServerMessage::from(event)).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Client fell behind on session events.");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

/// Routes a client message to the session or the playback engine.
fn dispatch(
    msg: ClientMessage,
    handle: &SessionHandle,
    playback: &RemotePlaybackEngine,
) -> Result<(), SessionClosed> {
    debug!(?msg, "Client message");
    match msg {
        ClientMessage::Start => handle.start(),
        ClientMessage::Stop => handle.stop(),
        ClientMessage::Resume => handle.resume(),
        ClientMessage::Continue { previous } => handle.request_continuation(previous),
        ClientMessage::Replay => handle.replay(),
        ClientMessage::Capture { session, event } => {
            handle.capture_event(CaptureEvent::new(session, event))
        }
        ClientMessage::Playback { utterance, event } => {
            playback.report(PlaybackEvent::new(utterance, event));
            Ok(())
        }
    }
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
