//! Shared fixtures for the unit tests: a two-member room wired to in-memory
//! collaborators, plus recording/failing doubles for the boundaries.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::directory::{profile, AccountDirectory, AccountProfile};
use crate::error::{DirectoryError, HistoryError, NotifyError};
use crate::history::{HistoryLog, MemoryHistory};
use crate::notify::{Notification, Notifier};
use crate::presence::{Member, Presence};
use crate::protocol::ServerMessage;
use crate::room::{ChatMessage, JournalEntry, RoomId, RoomState};
use crate::storage::{load_room, save_room, MemoryStore};
use crate::websocket::{load_or_hydrate, ServerState};

/// Mutable account directory so tests can flip premium flags mid-session.
pub struct TestDirectory {
    accounts: Mutex<HashMap<String, AccountProfile>>,
}

impl TestDirectory {
    pub fn with_pair(a: AccountProfile, b: AccountProfile) -> Self {
        let a = AccountProfile {
            partner_id: Some(b.user_id.clone()),
            ..a
        };
        let b = AccountProfile {
            partner_id: Some(a.user_id.clone()),
            ..b
        };
        let mut accounts = HashMap::new();
        accounts.insert(a.user_id.clone(), a);
        accounts.insert(b.user_id.clone(), b);
        Self {
            accounts: Mutex::new(accounts),
        }
    }

    pub fn upgrade(&self, user_id: &str) {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(user_id) {
            account.is_premium = true;
        }
    }

    pub fn add_unpaired(&self, user_id: &str) {
        let account = profile(user_id, user_id, false);
        self.accounts
            .lock()
            .unwrap()
            .insert(user_id.to_string(), account);
    }
}

#[async_trait]
impl AccountDirectory for TestDirectory {
    async fn resolve(&self, user_id: &str) -> Result<AccountProfile, DirectoryError> {
        self.accounts
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))
    }
}

/// Notifier double that records every push it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Notification)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: &str, notification: Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), notification));
        Ok(())
    }
}

/// History log whose durable backend is always down.
pub struct FailingHistory;

fn history_down() -> HistoryError {
    HistoryError::Decode(serde_json::from_str::<()>("down").unwrap_err())
}

#[async_trait]
impl HistoryLog for FailingHistory {
    async fn append_message(
        &self,
        _room_id: &RoomId,
        _message: &ChatMessage,
    ) -> Result<(), HistoryError> {
        Err(history_down())
    }

    async fn create_journal_entry(
        &self,
        _room_id: &RoomId,
        _author_id: &str,
        _body: &str,
    ) -> Result<JournalEntry, HistoryError> {
        Err(history_down())
    }

    async fn recent_messages(
        &self,
        _room_id: &RoomId,
        _limit: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        Err(history_down())
    }

    async fn journal_entries(&self, _room_id: &RoomId) -> Result<Vec<JournalEntry>, HistoryError> {
        Err(history_down())
    }
}

/// A hydrated two-member room ("alice" and "bob") over in-memory
/// collaborators, with both members' outboxes exposed as receivers.
pub struct TestRoom {
    pub state: ServerState,
    pub room_id: RoomId,
    pub alice: Arc<Member>,
    pub bob: Arc<Member>,
    pub rx_alice: mpsc::UnboundedReceiver<ServerMessage>,
    pub rx_bob: mpsc::UnboundedReceiver<ServerMessage>,
    pub history: Arc<MemoryHistory>,
    pub notifier: Arc<RecordingNotifier>,
    pub directory: Arc<TestDirectory>,
}

impl TestRoom {
    pub async fn start() -> Self {
        Self::build(false, false).await
    }

    pub async fn start_with_premium_partner() -> Self {
        Self::build(true, false).await
    }

    pub async fn start_with_failing_history() -> Self {
        Self::build(false, true).await
    }

    async fn build(premium_partner: bool, failing_history: bool) -> Self {
        let directory = Arc::new(TestDirectory::with_pair(
            profile("alice", "Alice", false),
            profile("bob", "Bob", premium_partner),
        ));
        let memory_history = Arc::new(MemoryHistory::new());
        let history: Arc<dyn HistoryLog> = if failing_history {
            Arc::new(FailingHistory)
        } else {
            memory_history.clone()
        };
        let notifier = Arc::new(RecordingNotifier::default());

        let state = ServerState {
            config: Arc::new(Config::default()),
            store: Arc::new(MemoryStore::new()),
            directory: directory.clone(),
            history,
            notifier: notifier.clone(),
            presence: Presence::new(),
        };

        let room_id = RoomId::for_pair("alice", "bob");
        let (tx_alice, rx_alice) = mpsc::unbounded_channel();
        let (tx_bob, rx_bob) = mpsc::unbounded_channel();
        let alice = Arc::new(Member::new(
            Uuid::new_v4(),
            &profile("alice", "Alice", false),
            "bob".to_string(),
            room_id.clone(),
            tx_alice,
        ));
        let bob = Arc::new(Member::new(
            Uuid::new_v4(),
            &profile("bob", "Bob", premium_partner),
            "alice".to_string(),
            room_id.clone(),
            tx_bob,
        ));
        state.presence.register(alice.clone());
        state.presence.register(bob.clone());

        // First-join hydration, exactly as the lifecycle manager performs it.
        let _ = load_or_hydrate(&state, &alice).await;

        Self {
            state,
            room_id,
            alice,
            bob,
            rx_alice,
            rx_bob,
            history: memory_history,
            notifier,
            directory,
        }
    }

    /// The authoritative state as the store currently holds it.
    pub async fn stored(&self) -> RoomState {
        load_room(&*self.state.store, &self.room_id)
            .await
            .expect("room state present")
    }

    /// Mutate the stored state directly, bypassing the dispatcher.
    pub async fn seed(&self, mutate: impl FnOnce(&mut RoomState)) {
        let mut state = self.stored().await;
        mutate(&mut state);
        save_room(&*self.state.store, &self.room_id, &state).await;
    }

    pub fn upgrade_account(&self, user_id: &str) {
        self.directory.upgrade(user_id);
    }
}

/// Everything currently queued on a member's outbox.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}
