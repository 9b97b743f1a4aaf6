//! In-memory [`AccountRepository`] fixture for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::account::{AccountId, AccountRepository, UserProfile};
use crate::XmppError;

#[derive(Debug, Clone)]
struct FixtureAccount {
    profile: UserProfile,
    banned: bool,
    friends: Vec<AccountId>,
}

/// An [`AccountRepository`] backed by maps populated directly in test
/// setup, with no network or process boundary.
#[derive(Default)]
pub struct InMemoryAccountRepository {
    tokens: RwLock<HashMap<String, AccountId>>,
    accounts: RwLock<HashMap<AccountId, FixtureAccount>>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account reachable via `token`, with the given display
    /// name and friend list. Overwrites any existing account of the same ID.
    pub async fn add_account(
        &self,
        token: &str,
        account_id: &str,
        display_name: &str,
        friends: Vec<AccountId>,
    ) {
        self.tokens
            .write()
            .await
            .insert(token.to_string(), account_id.to_string());
        self.accounts.write().await.insert(
            account_id.to_string(),
            FixtureAccount {
                profile: UserProfile {
                    account_id: account_id.to_string(),
                    display_name: display_name.to_string(),
                },
                banned: false,
                friends,
            },
        );
    }

    /// Mark an already-registered account as banned.
    pub async fn ban(&self, account_id: &str) {
        if let Some(account) = self.accounts.write().await.get_mut(account_id) {
            account.banned = true;
        }
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn resolve_token(&self, token: &str) -> Result<Option<AccountId>, XmppError> {
        Ok(self.tokens.read().await.get(token).cloned())
    }

    async fn get_user(&self, account_id: &str) -> Result<Option<UserProfile>, XmppError> {
        let accounts = self.accounts.read().await;
        let Some(account) = accounts.get(account_id) else {
            return Ok(None);
        };
        if account.banned {
            return Err(XmppError::permission_denied("account is banned"));
        }
        Ok(Some(account.profile.clone()))
    }

    async fn get_accepted_friends(&self, account_id: &str) -> Result<Vec<AccountId>, XmppError> {
        Ok(self
            .accounts
            .read()
            .await
            .get(account_id)
            .map(|a| a.friends.clone())
            .unwrap_or_default())
    }
}
