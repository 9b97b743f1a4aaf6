//! The seam between the session state machine and whatever backs user
//! accounts, auth tokens, and friend lists in production.

use async_trait::async_trait;

use crate::XmppError;

/// Stable identifier for an account. Used as the Client Registry key and
/// as the local part of every full JID this relay hands out.
pub type AccountId = String;

/// Everything the session state machine needs to know about an account
/// once its bearer token has resolved.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub account_id: AccountId,
    pub display_name: String,
}

/// Abstraction over the account store. Implemented in production by an
/// adapter over the operator's user database (see `voryn-server`'s Mongo
/// adapter) and in tests by an in-memory fixture.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Exchange a bearer token presented in SASL PLAIN for the account it
    /// authenticates. Returns `Ok(None)` for an unrecognized or expired
    /// token; `Err` only for repository-level failures (timeouts, I/O).
    async fn resolve_token(&self, token: &str) -> Result<Option<AccountId>, XmppError>;

    /// Look up the profile used to populate presence stanzas and the
    /// clients listing.
    async fn get_user(&self, account_id: &str) -> Result<Option<UserProfile>, XmppError>;

    /// Account IDs of `account_id`'s accepted (mutual) friends, used to
    /// scope the initial presence replay on bind.
    async fn get_accepted_friends(&self, account_id: &str) -> Result<Vec<AccountId>, XmppError>;
}
