use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::rest::{USER_HEADER, resolve_requester};
use crate::error::AppError;
use crate::models::user::Requester;
use crate::realtime::{ConnectionId, GroupKey};
use crate::state::AppState;

/// Browsers cannot set headers on an upgrade, so the user id may also come as a query param.
#[derive(Deserialize)]
pub struct WsParams {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
enum Action {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Deserialize)]
struct ClientCommand {
    action: Action,
    group: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, AppError> {
    let from_header = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|raw| {
            Uuid::parse_str(raw.trim())
                .map_err(|_| AppError::InvalidInput(format!("{USER_HEADER} is not a valid id")))
        })
        .transpose()?;

    let requester = match from_header.or(params.user_id) {
        Some(user_id) => Some(resolve_requester(&state, user_id)?),
        None => None,
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, requester)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, requester: Option<Requester>) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, rx) = state.realtime.connect();
    let mut events = ReceiverStream::new(rx);
    let mut cancel = state.cancel_signal();

    info!(connection = %connection, user_id = ?requester.map(|r| r.user_id), "websocket client connected");

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(error = %err, event = event.name(), "failed to serialize event for ws");
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = apply_command(&state, connection, requester.as_ref(), &text);
                        if sender.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = cancel.changed() => break,
        }
    }

    state.realtime.disconnect(connection);
    info!(connection = %connection, "websocket client disconnected");
}

fn apply_command(
    state: &AppState,
    connection: ConnectionId,
    requester: Option<&Requester>,
    text: &str,
) -> Value {
    match run_command(state, connection, requester, text) {
        Ok((action, group)) => json!({
            "event": action,
            "data": { "group": group.to_string() }
        }),
        Err(err) => {
            debug!(connection = %connection, error = %err, "ws command rejected");
            json!({
                "event": "error",
                "data": { "error": err.kind(), "message": err.to_string() }
            })
        }
    }
}

fn run_command(
    state: &AppState,
    connection: ConnectionId,
    requester: Option<&Requester>,
    text: &str,
) -> Result<(&'static str, GroupKey), AppError> {
    let command: ClientCommand = serde_json::from_str(text)
        .map_err(|err| AppError::InvalidInput(format!("malformed command: {err}")))?;
    let group: GroupKey = command.group.parse()?;

    match command.action {
        Action::Subscribe => {
            if group == GroupKey::Admin && !requester.is_some_and(Requester::is_admin) {
                return Err(AppError::Forbidden(
                    "the admin feed is reserved for administrators".to_string(),
                ));
            }
            state.realtime.subscribe(group, connection)?;
            Ok(("subscribed", group))
        }
        Action::Unsubscribe => {
            state.realtime.unsubscribe(group, connection);
            Ok(("unsubscribed", group))
        }
    }
}
