//! Environment-derived configuration.

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_XMPP_DOMAIN: &str = "prod.ol.epicgames.com";

/// Runtime configuration loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub mongo_uri: String,
    pub db_name: String,
    pub xmpp_domain: String,
}

impl Config {
    /// Read configuration from the process environment.
    ///
    /// `MONGO_URI` and `DB_NAME` are required; everything else falls back
    /// to a default. Fails fast rather than starting a server that can
    /// never resolve an account.
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {raw}"))?,
            Err(_) => DEFAULT_PORT,
        };

        let mongo_uri =
            std::env::var("MONGO_URI").context("MONGO_URI must be set to a MongoDB connection string")?;
        let db_name = std::env::var("DB_NAME").context("DB_NAME must be set")?;
        let xmpp_domain =
            std::env::var("XMPP_DOMAIN").unwrap_or_else(|_| DEFAULT_XMPP_DOMAIN.to_string());

        Ok(Self {
            port,
            mongo_uri,
            db_name,
            xmpp_domain,
        })
    }
}
