//! WebSocket connection handlers.
//!
//! One socket is one presence session for `(user_id, context)`:
//! - upgrade and every heartbeat / ping → `update_last_seen`
//! - `{"type":"leave"}` → graceful disconnection
//! - socket loss without a leave → disconnection with a grace period

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;

use crate::{
    domain::{ClientInfo, ConnectionContext, UserId},
    infrastructure::dto::websocket::{ClientMessage, MessageType, PresenceUpdatedMessage},
    ui::state::AppState,
    usecase::LastSeenOutcome,
};

use super::parse_target;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub user_id: String,
    pub context_type: String,
    pub context_id: String,
}

/// Identity of the socket's presence session
struct Session {
    user_id: UserId,
    context: ConnectionContext,
    client: ClientInfo,
}

fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header_value = |name| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
    };
    ClientInfo {
        user_agent: header_value(header::USER_AGENT),
        ip_address: header_value(header::HeaderName::from_static("x-forwarded-for")).map(
            |forwarded| {
                forwarded
                    .split(',')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string()
            },
        ),
    }
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let (user_id, context) = parse_target(query.user_id, &query.context_type, &query.context_id)?;
    let client = client_info(&headers);

    let outcome = state
        .coordinator
        .update_last_seen(&user_id, &context, &client)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    if outcome == LastSeenOutcome::Ignored {
        let status = state
            .coordinator
            .get_connection_state(&user_id, &context)
            .await
            .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
        if status.is_none() {
            tracing::warn!("Rejecting socket of unknown user '{}'", user_id);
            return Err(StatusCode::FORBIDDEN);
        }
    }

    tracing::info!(
        "'{}' opened a presence socket for {} ({})",
        user_id,
        context,
        outcome.label()
    );
    let session = Session {
        user_id,
        context,
        client,
    };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, session, outcome)))
}

/// Push a presence update to this client. Returns `false` once the socket is gone.
async fn push_presence(
    sender: &mut SplitSink<WebSocket, Message>,
    state: &AppState,
    session: &Session,
    outcome: &LastSeenOutcome,
) -> bool {
    let status = match state
        .coordinator
        .get_connection_state(&session.user_id, &session.context)
        .await
    {
        Ok(status) => status,
        Err(_) => return true,
    };
    let message = PresenceUpdatedMessage {
        r#type: MessageType::PresenceUpdated,
        outcome: outcome.label().to_string(),
        status: status.map(|status| status.as_str().to_string()),
        timestamp: state.coordinator.now().value(),
    };
    let json = match serde_json::to_string(&message) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize presence update: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    session: Session,
    outcome: LastSeenOutcome,
) {
    let (mut sender, mut receiver) = socket.split();

    if !push_presence(&mut sender, &state, &session, &outcome).await {
        tracing::warn!("Socket of '{}' closed before the first update", session.user_id);
    }

    let mut left = false;
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("WebSocket error from '{}': {}", session.user_id, e);
                break;
            }
        };

        let signal = match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!("Ignoring malformed message from '{}': {}", session.user_id, e);
                    continue;
                }
            },
            // pong is sent by axum
            Message::Ping(_) => ClientMessage::Heartbeat,
            Message::Close(_) => {
                tracing::debug!("'{}' closed the socket", session.user_id);
                break;
            }
            _ => continue,
        };

        match signal {
            ClientMessage::Heartbeat => {
                let result = state
                    .coordinator
                    .update_last_seen(&session.user_id, &session.context, &session.client)
                    .await;
                match result {
                    Ok(LastSeenOutcome::Heartbeat) | Ok(LastSeenOutcome::Ignored) => {}
                    Ok(outcome) => {
                        if !push_presence(&mut sender, &state, &session, &outcome).await {
                            break;
                        }
                    }
                    // already logged by the coordinator
                    Err(_) => {}
                }
            }
            ClientMessage::Leave { reason } => {
                if state
                    .coordinator
                    .handle_graceful_disconnection(&session.user_id, &session.context, reason)
                    .await
                    .is_ok()
                {
                    left = true;
                }
                break;
            }
        }
    }

    if left {
        tracing::info!("'{}' left {}", session.user_id, session.context);
        return;
    }

    // connection lost: start the grace period
    if let Ok(Some(task)) = state
        .coordinator
        .handle_disconnection(&session.user_id, &session.context, &session.client)
        .await
    {
        tracing::info!(
            "'{}' dropped from {}, finalizing at {} unless they return",
            session.user_id,
            session.context,
            task.run_at.value()
        );
    }
}
