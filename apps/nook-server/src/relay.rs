use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::presence::{Member, Presence};
use crate::protocol::ServerMessage;

/// What a relayed payload is, structurally. The relay never interprets SDP
/// or candidate contents; it only needs enough shape to know what can be
/// applied when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// An SDP offer or answer: applying it gives the receiver a remote
    /// description.
    RemoteDescription,
    /// An ICE candidate: only applicable once a remote description exists.
    IceCandidate,
    Other,
}

pub fn classify(payload: &Value) -> SignalKind {
    if payload.get("candidate").is_some() {
        return SignalKind::IceCandidate;
    }
    match payload.get("type").and_then(Value::as_str) {
        Some("offer") | Some("answer") => SignalKind::RemoteDescription,
        _ => SignalKind::Other,
    }
}

/// Pass a signaling payload through to `target`, verbatim, tagged with the
/// sender's connection id. Candidates that arrive before the target has been
/// sent a remote description are held in the target's connection context and
/// flushed, in arrival order, right after the first description goes out.
pub fn relay(presence: &Presence, sender: &Member, target: Uuid, payload: Value) {
    let Some(receiver) = presence.connection(target) else {
        debug!(
            sender = %sender.connection_id,
            %target,
            "dropping signal for unknown connection"
        );
        return;
    };

    let message = ServerMessage::Signal {
        sender: sender.connection_id,
        payload: payload.clone(),
    };

    match classify(&payload) {
        SignalKind::RemoteDescription => {
            receiver.send(message);
            receiver.mark_remote_description();
            for queued in receiver.take_pending_candidates() {
                receiver.send(queued);
            }
        }
        SignalKind::IceCandidate if !receiver.saw_remote_description() => {
            debug!(
                sender = %sender.connection_id,
                %target,
                "queueing early ice candidate"
            );
            receiver.queue_candidate(message);
        }
        SignalKind::IceCandidate | SignalKind::Other => {
            receiver.send(message);
        }
    }
}
