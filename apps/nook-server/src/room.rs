use serde::{Deserialize, Serialize};
use std::fmt;

/// Rolling chat window kept in room state. Older messages live only in the
/// durable message log.
pub const MESSAGE_WINDOW: usize = 50;

/// Server wall clock, milliseconds since epoch. The single source of "now"
/// for every authoritative timestamp.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Deterministic, order-independent key for the room shared by two paired
/// users. Both sides always resolve to the same id regardless of which of
/// them connects first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn for_pair(a: &str, b: &str) -> Self {
        let mut ids = [a, b];
        ids.sort_unstable();
        RoomId(format!("{}_{}", ids[0], ids[1]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn storage_key(&self) -> String {
        format!("room:{}", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoKind {
    Youtube,
    Url,
    File,
    Screen,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSource {
    pub kind: VideoKind,
    pub src: Option<String>,
}

impl VideoSource {
    pub fn none() -> Self {
        Self {
            kind: VideoKind::None,
            src: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.kind != VideoKind::None
    }
}

/// `current_time` is a measurement taken at `last_update_ms`, never a live
/// position. While playing, the live position must be derived with
/// [`PlaybackState::position_at`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_time: f64,
    pub rate: f64,
    pub last_update_ms: i64,
}

impl PlaybackState {
    pub fn paused_at_zero(now_ms: i64) -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            rate: 1.0,
            last_update_ms: now_ms,
        }
    }

    /// Derived live position at `now_ms`.
    pub fn position_at(&self, now_ms: i64) -> f64 {
        if !self.is_playing {
            return self.current_time;
        }
        let elapsed_ms = (now_ms - self.last_update_ms).max(0);
        self.current_time + (elapsed_ms as f64 / 1_000.0) * self.rate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Audio,
    Image,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub body: String,
    pub image: Option<String>,
    pub kind: MessageKind,
    pub sent_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub room_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbientTrack {
    Rain,
    Fireplace,
    Ocean,
    Forest,
    Breeze,
    Cafe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbientSound {
    pub track: Option<AmbientTrack>,
    pub is_playing: bool,
    pub volume: f64,
}

impl Default for AmbientSound {
    fn default() -> Self {
        Self {
            track: None,
            is_playing: false,
            volume: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiState {
    pub sidebar_visible: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            sidebar_visible: true,
        }
    }
}

/// The shared session. Owned by the store; mutated only by the action
/// dispatcher and the sync broadcaster, always under the room's
/// serialization lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub video_source: VideoSource,
    pub playback: PlaybackState,
    pub messages: Vec<ChatMessage>,
    pub journal_entries: Vec<JournalEntry>,
    pub ui: UiState,
    pub ambient_sound: AmbientSound,
    pub is_screen_sharing: bool,
    pub typing_user: Option<String>,
    pub is_premium: bool,
    pub created_at_ms: i64,
}

impl RoomState {
    /// State of a room nobody has touched yet: no media, paused at zero,
    /// empty histories.
    pub fn fresh(now_ms: i64) -> Self {
        Self {
            video_source: VideoSource::none(),
            playback: PlaybackState::paused_at_zero(now_ms),
            messages: Vec::new(),
            journal_entries: Vec::new(),
            ui: UiState::default(),
            ambient_sound: AmbientSound::default(),
            is_screen_sharing: false,
            typing_user: None,
            is_premium: false,
            created_at_ms: now_ms,
        }
    }

    /// Append to the rolling chat window, evicting the oldest beyond the cap.
    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if self.messages.len() > MESSAGE_WINDOW {
            let overflow = self.messages.len() - MESSAGE_WINDOW;
            self.messages.drain(..overflow);
        }
    }

    pub fn elapsed_since_created(&self, now_ms: i64) -> i64 {
        now_ms - self.created_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(n: usize) -> ChatMessage {
        ChatMessage {
            id: format!("m-{n}"),
            sender_id: "a".into(),
            sender_name: "A".into(),
            sender_avatar: None,
            body: format!("hello {n}"),
            image: None,
            kind: MessageKind::Text,
            sent_at_ms: n as i64,
        }
    }

    #[test]
    fn room_id_is_order_independent() {
        assert_eq!(RoomId::for_pair("alice", "bob"), RoomId::for_pair("bob", "alice"));
        assert_eq!(RoomId::for_pair("alice", "bob").as_str(), "alice_bob");
        assert_eq!(
            RoomId::for_pair("u2", "u1").storage_key(),
            "room:u1_u2"
        );
    }

    #[test]
    fn fresh_state_has_no_media_and_is_paused() {
        let state = RoomState::fresh(1_000);
        assert_eq!(state.video_source, VideoSource::none());
        assert!(!state.playback.is_playing);
        assert_eq!(state.playback.current_time, 0.0);
        assert_eq!(state.playback.last_update_ms, 1_000);
        assert!(!state.is_premium);
        assert!(state.messages.is_empty());
        assert!(state.journal_entries.is_empty());
    }

    #[test]
    fn message_window_is_fifo_capped() {
        let mut state = RoomState::fresh(0);
        for n in 0..MESSAGE_WINDOW + 7 {
            state.push_message(message(n));
        }
        assert_eq!(state.messages.len(), MESSAGE_WINDOW);
        // Oldest seven were evicted.
        assert_eq!(state.messages[0].id, "m-7");
        assert_eq!(state.messages.last().unwrap().id, format!("m-{}", MESSAGE_WINDOW + 6));
    }

    #[test]
    fn position_is_derived_while_playing() {
        let playback = PlaybackState {
            is_playing: true,
            current_time: 10.0,
            rate: 2.0,
            last_update_ms: 1_000,
        };
        assert_eq!(playback.position_at(2_500), 13.0);
        // A paused state never extrapolates.
        let paused = PlaybackState {
            is_playing: false,
            ..playback
        };
        assert_eq!(paused.position_at(2_500), 10.0);
        // Clock skew in the past is clamped.
        assert_eq!(playback.position_at(500), 10.0);
    }
}
