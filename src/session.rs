//! Credential storage and session validation.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::{self, Pool};

pub const TOKEN_KEY: &str = "token";
pub const EXPIRES_AT_KEY: &str = "expiresAt";

pub const ADMIN_TOKEN: &str = "admin-token";
pub const USER_TOKEN: &str = "user-token";

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    pool: Pool,
}

impl SqliteCredentialStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        db::get_credential(&self.pool, key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        db::set_credential(&self.pool, key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        db::remove_credential(&self.pool, key).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("not logged in")]
    Missing,
    #[error("session expired; please log in again")]
    Expired,
    #[error("session token not recognized; please log in again")]
    Invalid,
}

/// What the credential store holds about the current login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub async fn load(store: &dyn CredentialStore) -> Result<Self> {
        let token = store.get(TOKEN_KEY).await?.filter(|t| !t.trim().is_empty());
        let expires_at = match store.get(EXPIRES_AT_KEY).await? {
            Some(raw) => {
                let parsed = parse_expires_at(&raw);
                if parsed.is_none() {
                    warn!(%raw, "ignoring unparseable expiresAt");
                }
                parsed
            }
            None => None,
        };
        Ok(Self { token, expires_at })
    }

    pub async fn store(
        store: &dyn CredentialStore,
        token: &str,
        expires_at: Option<&str>,
    ) -> Result<()> {
        store.set(TOKEN_KEY, token).await?;
        match expires_at {
            Some(ts) => store.set(EXPIRES_AT_KEY, ts).await?,
            None => store.remove(EXPIRES_AT_KEY).await?,
        }
        Ok(())
    }

    /// Log out: forget token and expiry.
    pub async fn clear(store: &dyn CredentialStore) -> Result<()> {
        store.remove(TOKEN_KEY).await?;
        store.remove(EXPIRES_AT_KEY).await?;
        info!("session cleared");
        Ok(())
    }

    /// Admin sessions never expire locally; user sessions need a future
    /// `expiresAt`. Any other token is rejected.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<Role, SessionError> {
        match self.token.as_deref() {
            None => Err(SessionError::Missing),
            Some(ADMIN_TOKEN) => Ok(Role::Admin),
            Some(USER_TOKEN) => match self.expires_at {
                Some(exp) if exp > now => Ok(Role::User),
                _ => Err(SessionError::Expired),
            },
            Some(_) => Err(SessionError::Invalid),
        }
    }

    /// Validate, clearing the store when the session is unusable so the next
    /// command forces a fresh login.
    pub async fn require(store: &dyn CredentialStore, now: DateTime<Utc>) -> Result<(Self, Role)> {
        let session = Self::load(store).await?;
        match session.validate(now) {
            Ok(role) => Ok((session, role)),
            Err(err) => {
                if err != SessionError::Missing {
                    Self::clear(store).await?;
                }
                Err(err.into())
            }
        }
    }
}

/// Parse an ISO-8601 expiry. Values without an offset are taken as UTC and
/// a bare date means midnight UTC.
pub fn parse_expires_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}
