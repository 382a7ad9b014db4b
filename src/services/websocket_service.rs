use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        command::{CommandRequest, ControlCommandRequest},
        ws::{ClientInboundMessage, ClientOutboundMessage},
    },
    services::{command_service, info_service},
    state::{ClientConnection, SharedState},
};

const INFO_PUSH_INTERVAL: Duration = Duration::from_secs(1);

/// The client's writer task is gone.
#[derive(Debug, Error)]
#[error("connection closed")]
struct ConnectionClosed;

/// Handle the full lifecycle of one dashboard WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps pushes flowing while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    if state.is_shutting_down() {
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    }

    let client_id = Uuid::new_v4();
    state.clients().insert(
        client_id,
        ClientConnection {
            id: client_id,
            tx: outbound_tx.clone(),
        },
    );
    info!(id = %client_id, "dashboard client connected");

    match info_service::get_info(&state).await {
        Ok(info) => {
            let _ = send_message_to_websocket(&outbound_tx, &ClientOutboundMessage::Info(info));
        }
        Err(err) => warn!(id = %client_id, error = %err, "failed to build initial info"),
    }

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(id = %client_id, payload = %text, "received client message");
                let reply = match serde_json::from_str::<ClientInboundMessage>(&text) {
                    Ok(message) => handle_message(&state, message).await,
                    Err(err) => {
                        warn!(id = %client_id, error = %err, "failed to parse client message");
                        None
                    }
                };
                if let Some(reply) = reply {
                    if send_message_to_websocket(&outbound_tx, &reply).is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(id = %client_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.clients().remove(&client_id);
    info!(id = %client_id, "dashboard client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Run one client request. Returns the message to send back, if any.
async fn handle_message(
    state: &SharedState,
    message: ClientInboundMessage,
) -> Option<ClientOutboundMessage> {
    match message {
        ClientInboundMessage::Command { command, payload } => {
            match command_service::send_command(state, CommandRequest { command, payload }) {
                Ok(_) => None,
                Err(err) => Some(ClientOutboundMessage::CommandError(err.to_string())),
            }
        }
        ClientInboundMessage::Rcon { command, args } => {
            let request = ControlCommandRequest { command, args };
            Some(
                match command_service::send_control_command(state, request).await {
                    Ok(reply) => ClientOutboundMessage::RconResponse(reply.response),
                    Err(err) => ClientOutboundMessage::RconError(err.to_string()),
                },
            )
        }
        ClientInboundMessage::Unknown => {
            debug!("ignoring unknown client message type");
            None
        }
    }
}

/// Push `info` to every connected client once per interval until shutdown.
pub fn spawn_info_broadcaster(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = state.shutdown_watcher();
        let mut ticker = tokio::time::interval(INFO_PUSH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => broadcast_info(&state).await,
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        debug!("info broadcaster stopped");
    })
}

/// Resolves once the shutdown flag is set. The watch guard is released before returning.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}

/// Send the current info to every client, dropping those whose writer is gone.
pub async fn broadcast_info(state: &SharedState) {
    if state.clients().is_empty() {
        return;
    }

    let info = match info_service::get_info(state).await {
        Ok(info) => info,
        Err(err) => {
            warn!(error = %err, "failed to build info for broadcast");
            return;
        }
    };
    let message = ClientOutboundMessage::Info(info);

    let closed: Vec<Uuid> = state
        .clients()
        .iter()
        .filter(|client| send_message_to_websocket(&client.tx, &message).is_err())
        .map(|client| client.id)
        .collect();
    for id in closed {
        state.clients().remove(&id);
        debug!(%id, "dropped closed dashboard client");
    }
}

async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

/// Serialize a payload and queue it on the client's writer.
///
/// A serialization failure is logged and swallowed; only a closed writer is an error.
fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), ConnectionClosed>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| ConnectionClosed)
}
