use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::DirectoryError;

/// What the account service knows about a user, as far as this server cares:
/// who they are paired with and whether either side paid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountProfile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_premium: bool,
    pub partner_id: Option<String>,
}

/// Account service boundary. Authentication, signup and pairing management
/// live behind it; this server only resolves identities.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Result<AccountProfile, DirectoryError>;
}

pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDirectory {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AccountDirectory for HttpDirectory {
    async fn resolve(&self, user_id: &str) -> Result<AccountProfile, DirectoryError> {
        let url = format!("{}/internal/accounts/{}", self.base_url, user_id);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(user_id.to_string()));
        }
        let profile = response.error_for_status()?.json::<AccountProfile>().await?;
        Ok(profile)
    }
}

/// Fixed account set for tests and development. An empty directory rejects
/// everyone, which is the fail-closed default when no account service is
/// configured.
#[derive(Default)]
pub struct StaticDirectory {
    accounts: HashMap<String, AccountProfile>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_account(mut self, profile: AccountProfile) -> Self {
        self.accounts.insert(profile.user_id.clone(), profile);
        self
    }

    /// Register two mutually-paired users.
    #[cfg(test)]
    pub fn with_pair(self, a: AccountProfile, b: AccountProfile) -> Self {
        let a = AccountProfile {
            partner_id: Some(b.user_id.clone()),
            ..a
        };
        let b = AccountProfile {
            partner_id: Some(a.user_id.clone()),
            ..b
        };
        self.with_account(a).with_account(b)
    }
}

#[async_trait]
impl AccountDirectory for StaticDirectory {
    async fn resolve(&self, user_id: &str) -> Result<AccountProfile, DirectoryError> {
        self.accounts
            .get(user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))
    }
}

/// Profile builder used by tests.
#[cfg(test)]
pub fn profile(user_id: &str, display_name: &str, is_premium: bool) -> AccountProfile {
    AccountProfile {
        user_id: user_id.to_string(),
        display_name: display_name.to_string(),
        avatar_url: None,
        is_premium,
        partner_id: None,
    }
}
