use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{NotificationKind, ServerMessage};
use crate::room::{now_ms, VideoSource};
use crate::storage::{load_room, save_room};
use crate::websocket::ServerState;

/// What the clients are told when the gate closes. A policy outcome, not a
/// technical failure, so it rides a notification rather than an error frame.
const TRIAL_EXPIRED_MESSAGE: &str = "Free trial expired. Go premium to continue.";

/// Spawn the process-lifetime sync loop: the single source of "now" for
/// every room's playback position.
pub fn spawn(state: ServerState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(state.config.sync_interval_ms));
        loop {
            interval.tick().await;
            tick(&state).await;
        }
    })
}

/// Advance every room with live membership by one tick. Rooms whose state
/// cannot change this tick (paused, gated, empty) are skipped without a
/// broadcast.
pub async fn tick(state: &ServerState) {
    let now = now_ms();

    for room_id in state.presence.active_room_ids() {
        let Some(room) = state.presence.peek(&room_id) else {
            continue;
        };
        if room.member_count() == 0 {
            continue;
        }

        // Same unit of work as a dispatched action; the tick and the
        // dispatcher never interleave on one room.
        let _guard = room.serialize_mutations().await;
        let Some(mut current) = load_room(&*state.store, &room_id).await else {
            continue;
        };

        if !current.is_premium
            && current.elapsed_since_created(now) > state.config.free_trial_ms()
            && current.video_source.is_loaded()
        {
            warn!(room = %room_id, "free trial expired; gating video");
            current.video_source = VideoSource::none();
            current.is_screen_sharing = false;
            current.playback.is_playing = false;
            current.playback.last_update_ms = now;
            save_room(&*state.store, &room_id, &current).await;
            room.broadcast(ServerMessage::StateUpdate {
                state: current,
            });
            room.broadcast(ServerMessage::Notification {
                kind: NotificationKind::Error,
                message: TRIAL_EXPIRED_MESSAGE.into(),
            });
            continue;
        }

        if current.playback.is_playing {
            current.playback.current_time = current.playback.position_at(now);
            current.playback.last_update_ms = now;
            save_room(&*state.store, &room_id, &current).await;
            debug!(
                room = %room_id,
                position = current.playback.current_time,
                "tick advanced playback clock"
            );
            room.broadcast(ServerMessage::StateUpdate { state: current });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientAction;
    use crate::room::{RoomState, VideoKind};
    use crate::testing::{drain, TestRoom};

    #[tokio::test]
    async fn tick_advances_the_clock_by_elapsed_times_rate() {
        let mut room = TestRoom::start().await;
        room.seed(|state: &mut RoomState| {
            state.playback.is_playing = true;
            state.playback.current_time = 10.0;
            state.playback.rate = 2.0;
            state.playback.last_update_ms = now_ms() - 1_500;
        })
        .await;

        tick(&room.state).await;

        let stored = room.stored().await;
        assert!((stored.playback.current_time - 13.0).abs() < 0.25);
        assert!(stored.playback.is_playing);

        let to_bob = drain(&mut room.rx_bob);
        assert!(to_bob
            .iter()
            .any(|m| matches!(m, ServerMessage::StateUpdate { .. })));
        drain(&mut room.rx_alice);
    }

    #[tokio::test]
    async fn paused_rooms_are_not_broadcast() {
        let mut room = TestRoom::start().await;
        tick(&room.state).await;
        assert!(drain(&mut room.rx_alice).is_empty());
        assert!(drain(&mut room.rx_bob).is_empty());
    }

    #[tokio::test]
    async fn set_source_then_play_then_tick_lands_near_elapsed() {
        // The end-to-end scenario: A loads a video, B presses play, the next
        // tick reports ~elapsed seconds.
        let mut room = TestRoom::start().await;

        crate::actions::dispatch(
            &room.state,
            &room.alice,
            ClientAction::UpdateVideoSource {
                kind: VideoKind::Youtube,
                src: Some("abc123".into()),
            },
        )
        .await;
        let after_load = room.stored().await;
        assert!(!after_load.playback.is_playing);
        assert_eq!(after_load.playback.current_time, 0.0);

        crate::actions::dispatch(
            &room.state,
            &room.bob,
            ClientAction::UpdatePlaybackState {
                is_playing: Some(true),
                current_time: None,
                rate: None,
            },
        )
        .await;

        // Pretend 1.5s pass before the broadcaster fires.
        room.seed(|state: &mut RoomState| {
            state.playback.last_update_ms -= 1_500;
        })
        .await;
        tick(&room.state).await;

        let stored = room.stored().await;
        assert!((stored.playback.current_time - 1.5).abs() < 0.25);
        drain(&mut room.rx_alice);
        drain(&mut room.rx_bob);
    }

    #[tokio::test]
    async fn trial_expiry_gates_exactly_once() {
        let mut room = TestRoom::start().await;
        room.seed(|state: &mut RoomState| {
            state.created_at_ms = now_ms() - 25 * 60 * 60 * 1_000; // 25h old
            state.video_source = crate::room::VideoSource {
                kind: VideoKind::Youtube,
                src: Some("abc123".into()),
            };
            state.playback.is_playing = true;
        })
        .await;

        tick(&room.state).await;

        let stored = room.stored().await;
        assert_eq!(stored.video_source, VideoSource::none());
        assert!(!stored.playback.is_playing);

        let to_alice = drain(&mut room.rx_alice);
        assert!(to_alice.iter().any(|m| matches!(
            m,
            ServerMessage::Notification { kind: NotificationKind::Error, .. }
        )));

        // Next tick: source is already cleared, nothing further happens.
        tick(&room.state).await;
        assert!(drain(&mut room.rx_alice).is_empty());
        drain(&mut room.rx_bob);
    }

    #[tokio::test]
    async fn trial_does_not_gate_before_the_limit() {
        let mut room = TestRoom::start().await;
        room.seed(|state: &mut RoomState| {
            state.created_at_ms = now_ms() - 23 * 60 * 60 * 1_000; // 23h old
            state.video_source = crate::room::VideoSource {
                kind: VideoKind::Url,
                src: Some("https://example.com/v.mp4".into()),
            };
        })
        .await;

        tick(&room.state).await;
        assert!(room.stored().await.video_source.is_loaded());
        assert!(drain(&mut room.rx_alice).is_empty());
    }

    #[tokio::test]
    async fn premium_rooms_are_never_gated() {
        let mut room = TestRoom::start_with_premium_partner().await;
        room.seed(|state: &mut RoomState| {
            state.created_at_ms = now_ms() - 48 * 60 * 60 * 1_000;
            state.video_source = crate::room::VideoSource {
                kind: VideoKind::Youtube,
                src: Some("abc123".into()),
            };
        })
        .await;

        tick(&room.state).await;
        assert!(room.stored().await.video_source.is_loaded());
        drain(&mut room.rx_alice);
    }

    #[tokio::test]
    async fn empty_rooms_are_skipped() {
        let room = TestRoom::start().await;
        room.seed(|state: &mut RoomState| {
            state.playback.is_playing = true;
        })
        .await;
        room.state.presence.unregister(room.alice.connection_id);
        room.state.presence.unregister(room.bob.connection_id);

        let before = room.stored().await;
        tick(&room.state).await;
        // No live membership: the clock is not advanced and nothing is
        // persisted for the room this tick.
        assert_eq!(room.stored().await, before);
    }
}
