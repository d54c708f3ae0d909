use crate::auth::jwt::JwtAccessTokenService;
use crate::coordinator::{EditCoordinator, MALFORMED_MESSAGE, SHUTTING_DOWN_MESSAGE};
use crate::directory::PictureDirectory;
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope,
    HandshakeRejection,
};
use crate::events::{ChannelError, EventChannel};
use crate::gatekeeper::{self, EditHandshakeQuery, EditTicket};
use crate::metrics;
use crate::registry::ConnectionHandle;
use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use picedit_common::protocol::ws::decode_request;
use std::{pin::pin, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const EDIT_ROUTE: &str = "/ws/picture/edit";

const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
const MAX_FRAME_BYTES: usize = 262_144;

#[derive(Clone)]
pub struct EditRelayState {
    directory: PictureDirectory,
    jwt_service: Arc<JwtAccessTokenService>,
    coordinator: Arc<EditCoordinator>,
    channel: Arc<EventChannel>,
}

impl EditRelayState {
    pub fn new(
        directory: PictureDirectory,
        jwt_service: Arc<JwtAccessTokenService>,
        coordinator: Arc<EditCoordinator>,
        channel: Arc<EventChannel>,
    ) -> Self {
        Self { directory, jwt_service, coordinator, channel }
    }
}

pub fn router(state: EditRelayState) -> Router {
    Router::new().route(EDIT_ROUTE, get(ws_upgrade)).with_state(state)
}

/// Admission runs before the upgrade is validated, so a refused caller never
/// gets a socket and sees only the status code.
pub async fn ws_upgrade(
    State(state): State<EditRelayState>,
    query: Result<Query<EditHandshakeQuery>, QueryRejection>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let admission = match query {
        Ok(Query(query)) => {
            gatekeeper::admit(&state.directory, &state.jwt_service, &headers, &query).await
        }
        Err(rejection) => Err(HandshakeRejection::MalformedQuery(rejection.body_text())),
    };

    let ticket = match admission {
        Ok(ticket) => ticket,
        Err(rejection) => {
            metrics::record_handshake_rejection(rejection.reason());
            info!(
                reason = rejection.reason(),
                status = rejection.status().as_u16(),
                "edit channel handshake rejected"
            );
            return rejection.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let request_id =
        current_request_id().unwrap_or_else(|| request_id_from_headers_or_generate(&headers));
    ws.max_frame_size(MAX_FRAME_BYTES)
        .max_message_size(MAX_FRAME_BYTES)
        .on_failed_upgrade(|error| warn!(error = %error, "edit channel upgrade failed"))
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, handle_socket(state, ticket, socket)).await;
        })
}

/// Runs the close-path cleanup however the socket task ends, including
/// cancellation and panics.
struct ConnectionGuard {
    coordinator: Arc<EditCoordinator>,
    connection: ConnectionHandle,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.coordinator.leave(&self.connection);
        metrics::record_connection_closed();
    }
}

async fn handle_socket(state: EditRelayState, ticket: EditTicket, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    let EditTicket { user, resource_id } = ticket;

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<Utf8Bytes>();
    let connection = ConnectionHandle::new(resource_id, Arc::new(user), outbound_sender);
    let connection_id = connection.id();
    metrics::record_connection_opened();
    state.coordinator.join(&connection);
    let _guard = ConnectionGuard {
        coordinator: Arc::clone(&state.coordinator),
        connection: connection.clone(),
    };

    // Heartbeat: ping every HEARTBEAT_INTERVAL_MS; a ping left unanswered for
    // HEARTBEAT_TIMEOUT_MS closes the connection.
    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset();
    let heartbeat_timeout = Duration::from_millis(HEARTBEAT_TIMEOUT_MS);
    let mut pong_deadline = pin!(tokio::time::sleep(heartbeat_timeout));
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if socket.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                if !awaiting_pong {
                    awaiting_pong = true;
                    pong_deadline.as_mut().reset(Instant::now() + heartbeat_timeout);
                }
            }
            _ = &mut pong_deadline, if awaiting_pong => {
                warn!(
                    connection_id = %connection_id,
                    resource_id = %resource_id,
                    request_id = %request_id,
                    "heartbeat timeout, disconnecting"
                );
                break;
            }
            maybe_outbound = outbound_receiver.recv() => {
                let Some(frame) = maybe_outbound else {
                    break;
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        match decode_request(raw_message.as_str()) {
                            Ok(request) => {
                                if let Err(ChannelError::Closed) =
                                    state.channel.publish(&connection, request).await
                                {
                                    state.coordinator.reply_error(&connection, SHUTTING_DOWN_MESSAGE);
                                }
                            }
                            Err(error) => {
                                debug!(
                                    connection_id = %connection_id,
                                    error = %error,
                                    "rejecting malformed edit frame"
                                );
                                state.coordinator.reply_error(&connection, MALFORMED_MESSAGE);
                            }
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        state.coordinator.reply_error(&connection, MALFORMED_MESSAGE);
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        awaiting_pong = false;
                    }
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        debug!(connection_id = %connection_id, error = %error, "edit socket read failed");
                        break;
                    }
                }
            }
        }
    }
}
