use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actions;
use crate::auth::{token_from_request, verify_token};
use crate::config::Config;
use crate::directory::{AccountDirectory, AccountProfile};
use crate::error::AdmissionError;
use crate::history::HistoryLog;
use crate::notify::Notifier;
use crate::presence::{Member, Presence};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::relay;
use crate::room::{now_ms, RoomId, RoomState, MESSAGE_WINDOW};
use crate::storage::{load_room, save_room, RoomStore};

/// Everything a connection, the dispatcher and the broadcaster share.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RoomStore>,
    pub directory: Arc<dyn AccountDirectory>,
    pub history: Arc<dyn HistoryLog>,
    pub notifier: Arc<dyn Notifier>,
    pub presence: Presence,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// WebSocket upgrade handler. Admission runs before the upgrade completes
/// and fails closed: a rejected connection sees a status code and nothing
/// else.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<ServerState>,
) -> Response {
    match admit(&state, query.token.as_deref(), &headers).await {
        Ok((profile, partner_id)) => {
            ws.on_upgrade(move |socket| handle_socket(socket, state, profile, partner_id))
        }
        Err(err) => {
            warn!(error = %err, "connection rejected");
            err.status_code().into_response()
        }
    }
}

/// Token → identity → profile → partner. Pairing is a precondition, not a
/// runtime optional.
pub async fn admit(
    state: &ServerState,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<(AccountProfile, String), AdmissionError> {
    let token =
        token_from_request(query_token, headers).ok_or(AdmissionError::MissingToken)?;
    let user_id = verify_token(&token, &state.config.jwt_secret)?;
    let profile = state.directory.resolve(&user_id).await?;
    let partner_id = profile
        .partner_id
        .clone()
        .ok_or(AdmissionError::PartnerUnresolved)?;
    Ok((profile, partner_id))
}

/// Fetch the room's state, constructing and hydrating it if the store has
/// nothing (first join, or TTL expiry while idle). Callers hold the room's
/// mutation lock.
pub async fn load_or_hydrate(state: &ServerState, member: &Member) -> RoomState {
    if let Some(existing) = load_room(&*state.store, &member.room_id).await {
        return existing;
    }
    hydrate_room(state, member).await
}

async fn hydrate_room(state: &ServerState, member: &Member) -> RoomState {
    let room_id = &member.room_id;
    info!(room = %room_id, "hydrating room state");
    let mut fresh = RoomState::fresh(now_ms());

    match state.history.journal_entries(room_id).await {
        Ok(entries) => fresh.journal_entries = entries,
        Err(err) => {
            warn!(room = %room_id, error = %err, "journal hydration failed; starting empty")
        }
    }
    match state.history.recent_messages(room_id, MESSAGE_WINDOW).await {
        Ok(messages) => fresh.messages = messages,
        Err(err) => {
            warn!(room = %room_id, error = %err, "message hydration failed; starting empty")
        }
    }

    let partner_premium = match state.directory.resolve(&member.partner_id).await {
        Ok(profile) => profile.is_premium,
        Err(err) => {
            warn!(room = %room_id, error = %err, "partner premium lookup failed");
            false
        }
    };
    fresh.is_premium = member.is_premium || partner_premium;

    save_room(&*state.store, room_id, &fresh).await;
    fresh
}

async fn handle_socket(
    socket: WebSocket,
    state: ServerState,
    profile: AccountProfile,
    partner_id: String,
) {
    let connection_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Outbox pump: socket writes never block a room's unit of work.
    let pump_connection = connection_id;
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!(connection = %pump_connection, error = %err, "failed to encode server message")
                }
            }
        }
        debug!(connection = %pump_connection, "outbox pump ended");
    });

    let room_id = RoomId::for_pair(&profile.user_id, &partner_id);
    let member = Arc::new(Member::new(
        connection_id,
        &profile,
        partner_id,
        room_id.clone(),
        tx,
    ));

    let room = state.presence.room(&room_id);
    // Reconnection continuity: a pending teardown dies the moment we're back.
    room.cancel_grace_timer();

    let joined_state = {
        let _guard = room.serialize_mutations().await;
        load_or_hydrate(&state, &member).await
    };

    state.presence.register(member.clone());
    let partner_connection = room.partner_of(connection_id);

    info!(
        room = %room_id,
        user = %member.user_id,
        connection = %connection_id,
        "user joined room"
    );

    member.send(ServerMessage::RoomJoined {
        room_id: room_id.as_str().to_string(),
        state: joined_state,
        connection_id,
        partner_connection_id: partner_connection.map(|p| p.connection_id),
    });
    room.broadcast_except(connection_id, ServerMessage::PartnerOnline { connection_id });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(connection = %connection_id, error = %err, "websocket error");
                break;
            }
        };
        match frame {
            Message::Text(text) => handle_frame(&state, &member, &text).await,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => handle_frame(&state, &member, &text).await,
                Err(_) => {
                    debug!(connection = %connection_id, "ignoring non-utf8 binary frame")
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    disconnect(&state, &member);
}

async fn handle_frame(state: &ServerState, member: &Arc<Member>, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Action { action }) => actions::dispatch(state, member, action).await,
        Ok(ClientMessage::ReportBuffering { buffering }) => {
            actions::report_buffering(state, member, buffering).await
        }
        Ok(ClientMessage::Signal { target, payload }) => {
            relay::relay(&state.presence, member, target, payload)
        }
        Err(err) => {
            // Unknown or malformed input never mutates state.
            warn!(
                room = %member.room_id,
                user = %member.user_id,
                error = %err,
                "dropping unrecognized client message"
            );
            member.send(ServerMessage::Error {
                message: "Invalid message format.".into(),
            });
        }
    }
}

fn disconnect(state: &ServerState, member: &Arc<Member>) {
    let was_buffering = member.is_buffering();
    state.presence.unregister(member.connection_id);

    info!(
        room = %member.room_id,
        user = %member.user_id,
        connection = %member.connection_id,
        "user disconnected"
    );

    if let Some(room) = state.presence.peek(&member.room_id) {
        room.broadcast(ServerMessage::PartnerOffline {
            connection_id: member.connection_id,
        });
        if was_buffering {
            // A gone peer no longer counts against the weakest link.
            room.broadcast(ServerMessage::PartnerBuffering { buffering: false });
        }
    }

    schedule_teardown(state, member.room_id.clone());
}

/// After a short debounce, an empty room gets a grace-period timer; if it is
/// still empty when the timer fires, its in-memory bookkeeping is released.
/// The durable store entry is governed solely by its own TTL.
fn schedule_teardown(state: &ServerState, room_id: RoomId) {
    let presence = state.presence.clone();
    let debounce = Duration::from_millis(state.config.disconnect_debounce_ms);
    let grace = Duration::from_secs(state.config.grace_period_seconds);

    tokio::spawn(async move {
        tokio::time::sleep(debounce).await;
        let Some(room) = presence.peek(&room_id) else {
            return;
        };
        if room.member_count() > 0 {
            return;
        }

        let timer_presence = presence.clone();
        let timer_room_id = room_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if timer_presence.release_if_empty(&timer_room_id) {
                debug!(room = %timer_room_id, "released room bookkeeping after grace period");
            }
        });
        // The timer handle lives on the room entry so a reconnect can abort
        // it by name rather than by scanning a global table.
        room.set_grace_timer(handle);
    });
}
