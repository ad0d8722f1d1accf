use async_trait::async_trait;
use serde::Serialize;

use crate::error::NotifyError;

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// Push-notification boundary. Fire-and-forget: senders spawn the call and
/// log failures; delivery is never awaited on a dispatch path.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, notification: Notification) -> Result<(), NotifyError>;
}

pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, user_id: &str, notification: Notification) -> Result<(), NotifyError> {
        let url = format!("{}/notifications/{}", self.base_url, user_id);
        self.client
            .post(&url)
            .json(&notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// No-op notifier for tests and development without a push service.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _user_id: &str, _notification: Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}
