use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::room::{
    AmbientTrack, ChatMessage, JournalEntry, MessageKind, RoomState, VideoKind,
};

/// Messages sent from a client connection to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A room action, applied through the dispatcher.
    Action { action: ClientAction },
    /// Buffering report for the weakest-link coordinator.
    ReportBuffering { buffering: bool },
    /// WebRTC signaling payload for a specific connection.
    Signal {
        target: Uuid,
        payload: serde_json::Value,
    },
}

/// Closed set of client-originated room actions. Adding an action is a
/// compile-time-checked change: the dispatcher matches exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientAction {
    UpdatePlaybackState {
        #[serde(default)]
        is_playing: Option<bool>,
        #[serde(default)]
        current_time: Option<f64>,
        #[serde(default)]
        rate: Option<f64>,
    },
    UpdatePlaybackTime {
        current_time: f64,
    },
    UpdateVideoSource {
        kind: VideoKind,
        #[serde(default)]
        src: Option<String>,
    },
    SendMessage {
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        kind: Option<MessageKind>,
        #[serde(default)]
        image: Option<String>,
    },
    SetTyping {
        typing: bool,
    },
    UpdateUiState {
        #[serde(default)]
        sidebar_visible: Option<bool>,
    },
    SetAmbientSound {
        /// Absent = leave the track alone; explicit null = clear it.
        #[serde(
            default,
            deserialize_with = "double_option",
            skip_serializing_if = "Option::is_none"
        )]
        track: Option<Option<AmbientTrack>>,
        #[serde(default)]
        is_playing: Option<bool>,
        #[serde(default)]
        volume: Option<f64>,
    },
    CreateJournalEntry {
        body: String,
    },
    CheckPremiumStatus {},
}

/// Messages sent from the server to a client connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent to the joining connection only.
    RoomJoined {
        room_id: String,
        state: RoomState,
        connection_id: Uuid,
        partner_connection_id: Option<Uuid>,
    },
    PartnerOnline {
        connection_id: Uuid,
    },
    PartnerOffline {
        connection_id: Uuid,
    },
    /// Full authoritative room state.
    StateUpdate {
        state: RoomState,
    },
    NewMessage {
        message: ChatMessage,
    },
    NewJournalEntry {
        entry: JournalEntry,
    },
    PartnerTyping {
        user: Option<String>,
    },
    PartnerBuffering {
        buffering: bool,
    },
    /// User-facing policy outcome, distinct from technical failure.
    Notification {
        kind: NotificationKind,
        message: String,
    },
    Signal {
        sender: Uuid,
        payload: serde_json::Value,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
}

/// Distinguishes a field that was present-but-null from one that was absent,
/// which a plain `Option` cannot.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
