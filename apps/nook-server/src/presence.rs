use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::directory::AccountProfile;
use crate::protocol::ServerMessage;
use crate::room::RoomId;

/// One live, authenticated connection. Not persisted; dies with the socket.
pub struct Member {
    pub connection_id: Uuid,
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// Premium flag as of admission; re-checked on demand, never trusted to
    /// stay fresh.
    pub is_premium: bool,
    pub partner_id: String,
    pub room_id: RoomId,
    tx: mpsc::UnboundedSender<ServerMessage>,
    is_buffering: AtomicBool,
    saw_remote_description: AtomicBool,
    pending_candidates: Mutex<VecDeque<ServerMessage>>,
}

impl Member {
    pub fn new(
        connection_id: Uuid,
        profile: &AccountProfile,
        partner_id: String,
        room_id: RoomId,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            connection_id,
            user_id: profile.user_id.clone(),
            display_name: profile.display_name.clone(),
            avatar_url: profile.avatar_url.clone(),
            is_premium: profile.is_premium,
            partner_id,
            room_id,
            tx,
            is_buffering: AtomicBool::new(false),
            saw_remote_description: AtomicBool::new(false),
            pending_candidates: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a message on this connection's outbox. Sends to a closed
    /// connection are dropped; cleanup happens on the socket task.
    pub fn send(&self, message: ServerMessage) {
        if self.tx.send(message).is_err() {
            debug!(connection = %self.connection_id, "dropped message for closed connection");
        }
    }

    pub fn is_buffering(&self) -> bool {
        self.is_buffering.load(Ordering::SeqCst)
    }

    pub fn set_buffering(&self, buffering: bool) {
        self.is_buffering.store(buffering, Ordering::SeqCst);
    }

    pub fn saw_remote_description(&self) -> bool {
        self.saw_remote_description.load(Ordering::SeqCst)
    }

    pub fn mark_remote_description(&self) {
        self.saw_remote_description.store(true, Ordering::SeqCst);
    }

    /// Hold an ICE candidate that arrived before this connection had a
    /// remote description to apply it against.
    pub fn queue_candidate(&self, message: ServerMessage) {
        self.pending_candidates.lock().unwrap().push_back(message);
    }

    /// Drain queued candidates in arrival order.
    pub fn take_pending_candidates(&self) -> Vec<ServerMessage> {
        self.pending_candidates.lock().unwrap().drain(..).collect()
    }
}

/// In-memory bookkeeping for one room: its live connections, the per-room
/// mutation lock, the grace-period timer and the buffering-pause marker.
/// Released (as a whole) when the room stays empty past the grace period;
/// the durable store entry is untouched by that release.
pub struct RoomPresence {
    members: DashMap<Uuid, Arc<Member>>,
    /// Serializes every read-modify-write of this room's state; the sync
    /// tick and the dispatcher must never interleave.
    mutation_lock: Arc<tokio::sync::Mutex<()>>,
    grace_timer: Mutex<Option<JoinHandle<()>>>,
    /// Set when the coordinator paused playback because somebody stalled;
    /// the only pause the coordinator is allowed to undo.
    paused_for_buffering: AtomicBool,
}

impl RoomPresence {
    fn new() -> Self {
        Self {
            members: DashMap::new(),
            mutation_lock: Arc::new(tokio::sync::Mutex::new(())),
            grace_timer: Mutex::new(None),
            paused_for_buffering: AtomicBool::new(false),
        }
    }

    /// Take the room's mutation lock. Held across the full
    /// read-mutate-persist-broadcast unit.
    pub async fn serialize_mutations(&self) -> OwnedMutexGuard<()> {
        self.mutation_lock.clone().lock_owned().await
    }

    pub fn insert(&self, member: Arc<Member>) {
        self.members.insert(member.connection_id, member);
    }

    pub fn remove(&self, connection_id: Uuid) -> Option<Arc<Member>> {
        self.members.remove(&connection_id).map(|(_, m)| m)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// The first other live connection, if any.
    pub fn partner_of(&self, connection_id: Uuid) -> Option<Arc<Member>> {
        self.members
            .iter()
            .find(|e| *e.key() != connection_id)
            .map(|e| e.value().clone())
    }

    /// Whether a given identity currently has a live connection here.
    pub fn identity_online(&self, user_id: &str) -> bool {
        self.members.iter().any(|e| e.value().user_id == user_id)
    }

    /// Weakest link: true while anyone is stalled.
    pub fn any_buffering(&self) -> bool {
        self.members.iter().any(|e| e.value().is_buffering())
    }

    pub fn broadcast(&self, message: ServerMessage) {
        for member in self.members.iter() {
            member.value().send(message.clone());
        }
    }

    pub fn broadcast_except(&self, connection_id: Uuid, message: ServerMessage) {
        for member in self.members.iter() {
            if *member.key() != connection_id {
                member.value().send(message.clone());
            }
        }
    }

    pub fn paused_for_buffering(&self) -> bool {
        self.paused_for_buffering.load(Ordering::SeqCst)
    }

    pub fn set_paused_for_buffering(&self, paused: bool) {
        self.paused_for_buffering.store(paused, Ordering::SeqCst);
    }

    /// Replace the grace timer, aborting any previous one.
    pub fn set_grace_timer(&self, handle: JoinHandle<()>) {
        let mut timer = self.grace_timer.lock().unwrap();
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    /// Reconnection continuity: a pending teardown is cancelled the moment
    /// anyone comes back.
    pub fn cancel_grace_timer(&self) {
        if let Some(handle) = self.grace_timer.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Registry of all in-memory room bookkeeping plus a flat index from raw
/// connection id to member, which is what the signal relay keys on.
#[derive(Clone, Default)]
pub struct Presence {
    rooms: Arc<DashMap<RoomId, Arc<RoomPresence>>>,
    connections: Arc<DashMap<Uuid, Arc<Member>>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the bookkeeping entry for a room.
    pub fn room(&self, room_id: &RoomId) -> Arc<RoomPresence> {
        self.rooms
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(RoomPresence::new()))
            .clone()
    }

    /// The entry if it exists; never creates.
    pub fn peek(&self, room_id: &RoomId) -> Option<Arc<RoomPresence>> {
        self.rooms.get(room_id).map(|e| e.value().clone())
    }

    /// Room ids with at least one live connection.
    pub fn active_room_ids(&self) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|e| !e.value().members.is_empty())
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn register(&self, member: Arc<Member>) {
        self.room(&member.room_id).insert(member.clone());
        self.connections.insert(member.connection_id, member);
    }

    pub fn unregister(&self, connection_id: Uuid) -> Option<Arc<Member>> {
        let member = self.connections.remove(&connection_id).map(|(_, m)| m)?;
        if let Some(room) = self.peek(&member.room_id) {
            room.remove(connection_id);
        }
        Some(member)
    }

    /// Relay lookup, keyed by raw connection id, independent of rooms.
    pub fn connection(&self, connection_id: Uuid) -> Option<Arc<Member>> {
        self.connections
            .get(&connection_id)
            .map(|e| e.value().clone())
    }

    /// Drop a room's in-memory bookkeeping if it is still empty. Returns
    /// whether anything was released. The durable store entry is governed
    /// solely by its own TTL.
    pub fn release_if_empty(&self, room_id: &RoomId) -> bool {
        self.rooms
            .remove_if(room_id, |_, room| room.members.is_empty())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(room_id: &RoomId, user: &str) -> (Arc<Member>, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let profile = crate::directory::profile(user, &user.to_uppercase(), false);
        let member = Arc::new(Member::new(
            Uuid::new_v4(),
            &profile,
            "partner".to_string(),
            room_id.clone(),
            tx,
        ));
        (member, rx)
    }

    #[tokio::test]
    async fn registry_tracks_rooms_and_connections() {
        let presence = Presence::new();
        let room_id = RoomId::for_pair("a", "b");
        let (alice, _rx_a) = member(&room_id, "a");
        let (bob, _rx_b) = member(&room_id, "b");

        presence.register(alice.clone());
        presence.register(bob.clone());

        let room = presence.peek(&room_id).expect("room entry");
        assert_eq!(room.member_count(), 2);
        assert!(room.identity_online("a"));
        assert_eq!(
            room.partner_of(alice.connection_id).unwrap().connection_id,
            bob.connection_id
        );
        assert_eq!(
            presence
                .connection(bob.connection_id)
                .unwrap()
                .user_id,
            "b"
        );
        assert_eq!(presence.active_room_ids(), vec![room_id.clone()]);

        // Occupied rooms are never released.
        assert!(!presence.release_if_empty(&room_id));

        presence.unregister(alice.connection_id);
        presence.unregister(bob.connection_id);
        assert!(presence.release_if_empty(&room_id));
        assert!(presence.peek(&room_id).is_none());
    }

    #[tokio::test]
    async fn weakest_link_flag_scans_all_members() {
        let presence = Presence::new();
        let room_id = RoomId::for_pair("a", "b");
        let (alice, _rx_a) = member(&room_id, "a");
        let (bob, _rx_b) = member(&room_id, "b");
        presence.register(alice.clone());
        presence.register(bob.clone());

        let room = presence.peek(&room_id).unwrap();
        assert!(!room.any_buffering());
        bob.set_buffering(true);
        assert!(room.any_buffering());
        alice.set_buffering(true);
        bob.set_buffering(false);
        // One side clearing is not enough while the other is stalled.
        assert!(room.any_buffering());
        alice.set_buffering(false);
        assert!(!room.any_buffering());
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_sender() {
        let presence = Presence::new();
        let room_id = RoomId::for_pair("a", "b");
        let (alice, mut rx_a) = member(&room_id, "a");
        let (bob, mut rx_b) = member(&room_id, "b");
        presence.register(alice.clone());
        presence.register(bob.clone());

        let room = presence.peek(&room_id).unwrap();
        room.broadcast_except(
            alice.connection_id,
            ServerMessage::PartnerTyping {
                user: Some("a".into()),
            },
        );

        assert!(matches!(
            rx_b.try_recv(),
            Ok(ServerMessage::PartnerTyping { .. })
        ));
        assert!(rx_a.try_recv().is_err());
    }
}
