//! MongoDB-backed [`AccountRepository`].

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use voryn_xmpp::{AccountId, AccountRepository, UserProfile, XmppError};

const USERS_COLLECTION: &str = "users";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "accountId")]
    account_id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    token: String,
    #[serde(default)]
    banned: bool,
    #[serde(default)]
    friends: Vec<String>,
}

/// Account store backed by a single `users` collection: one document per
/// account, carrying its current session token, display name, ban flag,
/// and accepted friend IDs.
pub struct MongoAccountRepository {
    users: Collection<UserDocument>,
}

impl MongoAccountRepository {
    pub async fn connect(mongo_uri: &str, db_name: &str) -> anyhow::Result<Self> {
        let client = Client::with_uri_str(mongo_uri).await?;
        let db = client.database(db_name);
        Ok(Self {
            users: db.collection(USERS_COLLECTION),
        })
    }
}

#[async_trait]
impl AccountRepository for MongoAccountRepository {
    #[instrument(skip(self, token))]
    async fn resolve_token(&self, token: &str) -> Result<Option<AccountId>, XmppError> {
        let filter = doc! { "token": token };
        let document = self
            .users
            .find_one(filter)
            .await
            .map_err(|e| XmppError::repository(format!("resolve_token: {e}")))?;
        Ok(document.map(|d| d.account_id))
    }

    #[instrument(skip(self))]
    async fn get_user(&self, account_id: &str) -> Result<Option<UserProfile>, XmppError> {
        let filter = doc! { "accountId": account_id };
        let document = self
            .users
            .find_one(filter)
            .await
            .map_err(|e| XmppError::repository(format!("get_user: {e}")))?;

        let Some(document) = document else {
            return Ok(None);
        };
        if document.banned {
            return Err(XmppError::permission_denied("account is banned"));
        }
        Ok(Some(UserProfile {
            account_id: document.account_id,
            display_name: document.display_name,
        }))
    }

    #[instrument(skip(self))]
    async fn get_accepted_friends(&self, account_id: &str) -> Result<Vec<AccountId>, XmppError> {
        let filter = doc! { "accountId": account_id };
        let document = self
            .users
            .find_one(filter)
            .await
            .map_err(|e| XmppError::repository(format!("get_accepted_friends: {e}")))?;
        Ok(document.map(|d| d.friends).unwrap_or_default())
    }
}
