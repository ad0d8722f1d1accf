use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::HistoryError;
use crate::room::{now_ms, ChatMessage, JournalEntry, RoomId};

/// Durable message/journal log boundary. The full chat history and the
/// journal of record live behind it; room state only mirrors a window
/// (messages) or a copy (journal).
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Append a chat message. Callers spawn this off the dispatch path;
    /// failure costs durability, never the live session.
    async fn append_message(
        &self,
        room_id: &RoomId,
        message: &ChatMessage,
    ) -> Result<(), HistoryError>;

    /// Create a journal entry durably. The returned entry carries the
    /// durably-assigned id; in-memory state must only ever see that id.
    async fn create_journal_entry(
        &self,
        room_id: &RoomId,
        author_id: &str,
        body: &str,
    ) -> Result<JournalEntry, HistoryError>;

    /// Most recent messages for hydration, oldest first.
    async fn recent_messages(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError>;

    /// All journal entries for hydration, oldest first.
    async fn journal_entries(&self, room_id: &RoomId) -> Result<Vec<JournalEntry>, HistoryError>;
}

pub struct HttpHistory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHistory {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl HistoryLog for HttpHistory {
    async fn append_message(
        &self,
        room_id: &RoomId,
        message: &ChatMessage,
    ) -> Result<(), HistoryError> {
        let url = format!("{}/rooms/{}/messages", self.base_url, room_id);
        self.client
            .post(&url)
            .json(message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn create_journal_entry(
        &self,
        room_id: &RoomId,
        author_id: &str,
        body: &str,
    ) -> Result<JournalEntry, HistoryError> {
        let url = format!("{}/rooms/{}/journal", self.base_url, room_id);
        let payload = self
            .client
            .post(&url)
            .json(&json!({ "author_id": author_id, "body": body }))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(serde_json::from_str(&payload)?)
    }

    async fn recent_messages(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        let url = format!(
            "{}/rooms/{}/messages?limit={}",
            self.base_url, room_id, limit
        );
        let payload = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(serde_json::from_str(&payload)?)
    }

    async fn journal_entries(&self, room_id: &RoomId) -> Result<Vec<JournalEntry>, HistoryError> {
        let url = format!("{}/rooms/{}/journal", self.base_url, room_id);
        let payload = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(serde_json::from_str(&payload)?)
    }
}

/// Process-local log for tests and development.
#[derive(Default)]
pub struct MemoryHistory {
    messages: Mutex<HashMap<String, Vec<ChatMessage>>>,
    journals: Mutex<HashMap<String, Vec<JournalEntry>>>,
    next_id: AtomicU64,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn message_count(&self, room_id: &RoomId) -> usize {
        self.messages
            .lock()
            .unwrap()
            .get(room_id.as_str())
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl HistoryLog for MemoryHistory {
    async fn append_message(
        &self,
        room_id: &RoomId,
        message: &ChatMessage,
    ) -> Result<(), HistoryError> {
        self.messages
            .lock()
            .unwrap()
            .entry(room_id.as_str().to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn create_journal_entry(
        &self,
        room_id: &RoomId,
        author_id: &str,
        body: &str,
    ) -> Result<JournalEntry, HistoryError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = JournalEntry {
            id: format!("entry-{id}"),
            room_id: room_id.as_str().to_string(),
            author_id: author_id.to_string(),
            body: body.to_string(),
            created_at_ms: now_ms(),
        };
        self.journals
            .lock()
            .unwrap()
            .entry(room_id.as_str().to_string())
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    async fn recent_messages(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        let messages = self.messages.lock().unwrap();
        let all = messages.get(room_id.as_str()).cloned().unwrap_or_default();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn journal_entries(&self, room_id: &RoomId) -> Result<Vec<JournalEntry>, HistoryError> {
        let journals = self.journals.lock().unwrap();
        Ok(journals.get(room_id.as_str()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn journal_entries_get_durable_ids_in_order() {
        let history = MemoryHistory::new();
        let room_id = RoomId::for_pair("a", "b");

        let first = history
            .create_journal_entry(&room_id, "a", "first")
            .await
            .unwrap();
        let second = history
            .create_journal_entry(&room_id, "a", "second")
            .await
            .unwrap();
        assert_eq!(first.id, "entry-1");
        assert_eq!(second.id, "entry-2");

        let entries = history.journal_entries(&room_id).await.unwrap();
        assert_eq!(entries, vec![first, second]);
    }

    #[tokio::test]
    async fn recent_messages_returns_newest_window_oldest_first() {
        let history = MemoryHistory::new();
        let room_id = RoomId::for_pair("a", "b");
        for n in 0..5 {
            let message = ChatMessage {
                id: format!("m-{n}"),
                sender_id: "a".into(),
                sender_name: "A".into(),
                sender_avatar: None,
                body: format!("{n}"),
                image: None,
                kind: crate::room::MessageKind::Text,
                sent_at_ms: n,
            };
            history.append_message(&room_id, &message).await.unwrap();
        }

        let recent = history.recent_messages(&room_id, 3).await.unwrap();
        assert_eq!(
            recent.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["m-2", "m-3", "m-4"]
        );
    }
}
