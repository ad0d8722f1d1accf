use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::notify::Notification;
use crate::presence::Member;
use crate::protocol::{ClientAction, ServerMessage};
use crate::room::{
    now_ms, ChatMessage, MessageKind, PlaybackState, VideoKind, VideoSource,
};
use crate::storage::{load_room, save_room};
use crate::websocket::{load_or_hydrate, ServerState};

/// Apply one client action to the sender's room: fetch state, mutate,
/// persist, broadcast, all under the room's mutation lock. Failures are
/// logged with room/action context and degrade to a no-op for that single
/// action; nothing escapes this boundary.
pub async fn dispatch(state: &ServerState, member: &Arc<Member>, action: ClientAction) {
    let room_id = &member.room_id;
    let Some(room) = state.presence.peek(room_id) else {
        return;
    };

    debug!(
        room = %room_id,
        user = %member.user_id,
        action = action_name(&action),
        "dispatching client action"
    );

    // Fresh playback data proves a reported stall resolved.
    if member.is_buffering()
        && matches!(
            action,
            ClientAction::UpdatePlaybackState { .. } | ClientAction::UpdatePlaybackTime { .. }
        )
    {
        member.set_buffering(false);
        room.broadcast_except(
            member.connection_id,
            ServerMessage::PartnerBuffering { buffering: false },
        );
    }

    let _guard = room.serialize_mutations().await;
    let mut current = load_or_hydrate(state, member).await;
    let server_time = now_ms();

    match action {
        ClientAction::UpdatePlaybackState {
            is_playing,
            current_time,
            rate,
        } => {
            if is_playing.is_some() {
                // The user took control; any coordinator pause is over.
                room.set_paused_for_buffering(false);
            }
            if let Some(playing) = is_playing {
                current.playback.is_playing = playing;
            }
            if let Some(time) = current_time {
                current.playback.current_time = time;
            }
            if let Some(rate) = rate {
                current.playback.rate = rate;
            }
            current.playback.last_update_ms = server_time;
        }

        ClientAction::UpdatePlaybackTime { current_time } => {
            current.playback.current_time = current_time;
            current.playback.last_update_ms = server_time;
        }

        ClientAction::UpdateVideoSource { kind, src } => {
            current.video_source = VideoSource { kind, src };
            current.playback = PlaybackState::paused_at_zero(server_time);
            current.is_screen_sharing = kind == VideoKind::Screen;
            room.set_paused_for_buffering(false);
        }

        ClientAction::SendMessage { body, kind, image } => {
            let has_image = image.is_some();
            let body = body.unwrap_or_default();
            if body.trim().is_empty() && !has_image {
                member.send(ServerMessage::Error {
                    message: "Cannot send an empty message.".into(),
                });
                return;
            }

            let message = ChatMessage {
                id: Uuid::new_v4().to_string(),
                sender_id: member.user_id.clone(),
                sender_name: member.display_name.clone(),
                sender_avatar: member.avatar_url.clone(),
                body: if body.trim().is_empty() {
                    "Image attachment".into()
                } else {
                    body
                },
                image,
                kind: kind.unwrap_or(if has_image {
                    MessageKind::Image
                } else {
                    MessageKind::Text
                }),
                sent_at_ms: server_time,
            };

            room.broadcast(ServerMessage::NewMessage {
                message: message.clone(),
            });
            current.push_message(message.clone());
            save_room(&*state.store, room_id, &current).await;

            // Durable log write happens off the dispatch path; losing it
            // costs durability, not the live session.
            let history = state.history.clone();
            let log_room = room_id.clone();
            let log_message = message.clone();
            tokio::spawn(async move {
                if let Err(err) = history.append_message(&log_room, &log_message).await {
                    error!(room = %log_room, error = %err, "failed to persist chat message");
                }
            });

            if !room.identity_online(&member.partner_id) {
                let notifier = state.notifier.clone();
                let partner_id = member.partner_id.clone();
                let notification = Notification {
                    title: message.sender_name.clone(),
                    body: if message.image.is_some() {
                        "Sent an image".into()
                    } else {
                        message.body.clone()
                    },
                };
                tokio::spawn(async move {
                    if let Err(err) = notifier.notify(&partner_id, notification).await {
                        warn!(user = %partner_id, error = %err, "push notification failed");
                    }
                });
            }
            return;
        }

        ClientAction::SetTyping { typing } => {
            current.typing_user = typing.then(|| member.user_id.clone());
            room.broadcast_except(
                member.connection_id,
                ServerMessage::PartnerTyping {
                    user: current.typing_user.clone(),
                },
            );
            save_room(&*state.store, room_id, &current).await;
            return;
        }

        ClientAction::UpdateUiState { sidebar_visible } => {
            if let Some(visible) = sidebar_visible {
                current.ui.sidebar_visible = visible;
            }
        }

        ClientAction::SetAmbientSound {
            track,
            is_playing,
            volume,
        } => {
            if let Some(track) = track {
                current.ambient_sound.track = track;
            }
            if let Some(playing) = is_playing {
                current.ambient_sound.is_playing = playing;
            }
            if let Some(volume) = volume {
                current.ambient_sound.volume = volume.clamp(0.0, 1.0);
            }
        }

        ClientAction::CreateJournalEntry { body } => {
            if body.trim().is_empty() {
                member.send(ServerMessage::Error {
                    message: "Journal entries cannot be empty.".into(),
                });
                return;
            }
            // Durable write first; in-memory state only ever sees the
            // durably-assigned id.
            match state
                .history
                .create_journal_entry(room_id, &member.user_id, &body)
                .await
            {
                Ok(entry) => {
                    current.journal_entries.push(entry.clone());
                    room.broadcast(ServerMessage::NewJournalEntry { entry });
                    save_room(&*state.store, room_id, &current).await;
                    return;
                }
                Err(err) => {
                    error!(room = %room_id, error = %err, "failed to save journal entry");
                    member.send(ServerMessage::Error {
                        message: "Failed to save journal entry.".into(),
                    });
                    return;
                }
            }
        }

        ClientAction::CheckPremiumStatus {} => {
            let mine = match state.directory.resolve(&member.user_id).await {
                Ok(profile) => profile.is_premium,
                Err(err) => {
                    warn!(room = %room_id, error = %err, "premium re-check failed for member");
                    false
                }
            };
            let partners = match state.directory.resolve(&member.partner_id).await {
                Ok(profile) => profile.is_premium,
                Err(err) => {
                    warn!(room = %room_id, error = %err, "premium re-check failed for partner");
                    false
                }
            };
            // Monotonic: premium is never revoked mid-session.
            if (mine || partners) && !current.is_premium {
                info!(room = %room_id, "room upgraded to premium");
                current.is_premium = true;
                save_room(&*state.store, room_id, &current).await;
            }
            // Folded into the next full broadcast.
            return;
        }
    }

    // Default path for every action that didn't return after a narrow
    // broadcast: persist, then push full authoritative state to the room.
    save_room(&*state.store, room_id, &current).await;
    room.broadcast(ServerMessage::StateUpdate { state: current });
}

/// Weakest-link coordinator (invoked by explicit client reports; the
/// dispatcher clears flags as a side effect of playback actions). If anyone
/// is stalled, nobody plays; resume only when the pause was ours and every
/// live connection reports ready.
pub async fn report_buffering(state: &ServerState, member: &Arc<Member>, buffering: bool) {
    let room_id = &member.room_id;
    let Some(room) = state.presence.peek(room_id) else {
        return;
    };

    member.set_buffering(buffering);
    room.broadcast_except(
        member.connection_id,
        ServerMessage::PartnerBuffering { buffering },
    );

    if buffering {
        let _guard = room.serialize_mutations().await;
        let Some(mut current) = load_room(&*state.store, room_id).await else {
            return;
        };
        if !current.playback.is_playing {
            return;
        }
        let now = now_ms();
        // Fold elapsed play time in so the position survives the stall.
        current.playback.current_time = current.playback.position_at(now);
        current.playback.is_playing = false;
        current.playback.last_update_ms = now;
        room.set_paused_for_buffering(true);
        info!(room = %room_id, user = %member.user_id, "pausing playback for buffering");
        save_room(&*state.store, room_id, &current).await;
        room.broadcast(ServerMessage::StateUpdate { state: current });
    } else {
        if !room.paused_for_buffering() || room.any_buffering() {
            // Conservative: one side clearing its flag is not a resume
            // while another is still stalled, and a user-initiated pause is
            // never overridden.
            return;
        }
        let _guard = room.serialize_mutations().await;
        if !room.paused_for_buffering() || room.any_buffering() {
            return;
        }
        let Some(mut current) = load_room(&*state.store, room_id).await else {
            return;
        };
        if current.playback.is_playing {
            return;
        }
        current.playback.is_playing = true;
        current.playback.last_update_ms = now_ms();
        room.set_paused_for_buffering(false);
        info!(room = %room_id, "all connections ready; resuming playback");
        save_room(&*state.store, room_id, &current).await;
        room.broadcast(ServerMessage::StateUpdate { state: current });
    }
}

fn action_name(action: &ClientAction) -> &'static str {
    match action {
        ClientAction::UpdatePlaybackState { .. } => "update_playback_state",
        ClientAction::UpdatePlaybackTime { .. } => "update_playback_time",
        ClientAction::UpdateVideoSource { .. } => "update_video_source",
        ClientAction::SendMessage { .. } => "send_message",
        ClientAction::SetTyping { .. } => "set_typing",
        ClientAction::UpdateUiState { .. } => "update_ui_state",
        ClientAction::SetAmbientSound { .. } => "set_ambient_sound",
        ClientAction::CreateJournalEntry { .. } => "create_journal_entry",
        ClientAction::CheckPremiumStatus {} => "check_premium_status",
    }
}
