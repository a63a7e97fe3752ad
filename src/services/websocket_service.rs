use std::panic::AssertUnwindSafe;

use axum::extract::ws::{Message, WebSocket};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientRequest, ServerMessage},
    error::{INTERNAL_ERROR_MESSAGE, ServiceError},
    services::dispatcher::CommandDispatcher,
    state::SharedState,
};

/// Handle the full lifecycle for an individual quiz WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection = Uuid::new_v4();
    let dispatcher = CommandDispatcher::new(state);
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Dedicated writer task keeps notifications flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let Some(frame) = encode(&message) else {
                continue;
            };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    dispatcher.on_connect(connection, outbound_tx.clone());

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let response = match ClientRequest::from_json_str(&text) {
                    Ok(request) => process_guarded(&dispatcher, connection, request).await,
                    Err(err) => {
                        warn!(connection = %connection, error = %err, "failed to parse client request");
                        ServiceError::MalformedRequest.into()
                    }
                };
                if outbound_tx.send(response).is_err() {
                    info!(connection = %connection, "writer closed, terminating");
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!(connection = %connection, "client closed");
                break;
            }
            Ok(Message::Binary(_)) => {
                let _ = outbound_tx.send(ServiceError::MalformedRequest.into());
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection = %connection, error = %err, "websocket error");
                break;
            }
        }
    }

    dispatcher.on_disconnect(connection).await;
    finalize(writer_task, outbound_tx).await;
}

/// Run the dispatcher, turning a panic into a generic error response.
async fn process_guarded(
    dispatcher: &CommandDispatcher,
    connection: Uuid,
    request: ClientRequest,
) -> ServerMessage {
    let command = request.name();
    match AssertUnwindSafe(dispatcher.process(connection, request))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(_) => {
            error!(connection = %connection, command, "request handler panicked");
            ServerMessage::error(INTERNAL_ERROR_MESSAGE)
        }
    }
}

/// Serialize a response into a text frame. Serialization failures are logged and dropped.
fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(payload) => Some(Message::Text(payload.into())),
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{message:?}`");
            None
        }
    }
}

async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<ServerMessage>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
