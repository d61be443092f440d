//! Redis-backed, best-effort caching of sessions, user snapshots, and
//! decoded JWT claims.
//!
//! Three namespaces with independent keys and TTLs, so invalidating one
//! never implicitly touches the others:
//!
//! - `session:{user_id}`: 30 days, TTL slid forward on every read
//! - `user:{user_id}` / `user:email:{email}`: 15 minutes
//! - `jwt:{hash}`: 1 hour, keyed by a hash of the token, never the token
//!
//! Every operation goes through [`best_effort`]: a cache failure degrades to
//! a miss or a no-op, and authentication stays correct with the cache gone.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::auth::PublicUser;
use crate::config::AuthConfig;
use crate::token::AccessClaims;

/// Key/value cache port with Redis-shaped semantics.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn setex(&self, key: &str, ttl: Duration, value: String) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Keys currently live under a prefix.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// A cached session entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedSession {
    pub user: PublicUser,
    pub expires: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Convert a cache failure into a logged miss/no-op.
///
/// This is the single point where "caching must never break the primary
/// flow" is enforced; callers simply treat `None` as a miss.
fn best_effort<T>(operation: &'static str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(operation, error = %err, "cache unavailable; degrading to miss");
            None
        }
    }
}

fn session_key(user_id: uuid::Uuid) -> String {
    format!("session:{user_id}")
}

fn user_key(user_id: uuid::Uuid) -> String {
    format!("user:{user_id}")
}

fn user_email_key(email: &str) -> String {
    format!("user:email:{email}")
}

/// Raw bearer tokens never become cache keys; a digest does.
fn jwt_key(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("jwt:{}", URL_SAFE_NO_PAD.encode(digest))
}

/// Namespaced, TTL-aware facade over the [`CacheStore`] port.
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<dyn CacheStore>,
    session_ttl: Duration,
    user_ttl: Duration,
    jwt_ttl: Duration,
}

impl SessionCache {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, config: &AuthConfig) -> Self {
        Self {
            store,
            session_ttl: Duration::from_secs(config.session_ttl_seconds()),
            user_ttl: Duration::from_secs(config.user_cache_ttl_seconds()),
            jwt_ttl: Duration::from_secs(config.jwt_cache_ttl_seconds()),
        }
    }

    fn session_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(self.session_ttl.as_secs() as i64)
    }

    /// Write a fresh session entry for the user.
    pub async fn store_session(&self, user: &PublicUser) {
        let now = Utc::now();
        let entry = CachedSession {
            user: user.clone(),
            expires: self.session_deadline(now),
            last_active: now,
        };
        self.put_json("session.set", &session_key(user.id), &entry, self.session_ttl)
            .await;
    }

    /// Read the user's session, validating expiry and sliding the TTL
    /// forward on success.
    pub async fn get_session(&self, user_id: uuid::Uuid) -> Option<CachedSession> {
        let key = session_key(user_id);
        let raw = best_effort("session.get", self.store.get(&key).await).flatten()?;
        let Ok(mut entry) = serde_json::from_str::<CachedSession>(&raw) else {
            // Unreadable entries are dropped rather than served.
            best_effort("session.del", self.store.del(&key).await);
            return None;
        };

        let now = Utc::now();
        if entry.expires <= now {
            // Entry outlived its own expiry (clock skew or a lagging store).
            best_effort("session.del", self.store.del(&key).await);
            return None;
        }

        entry.last_active = now;
        entry.expires = self.session_deadline(now);
        self.put_json("session.refresh", &key, &entry, self.session_ttl)
            .await;
        Some(entry)
    }

    pub async fn invalidate_session(&self, user_id: uuid::Uuid) {
        best_effort(
            "session.del",
            self.store.del(&session_key(user_id)).await,
        );
    }

    /// Cache a sanitized user snapshot under both the id and email keys.
    pub async fn store_user(&self, user: &PublicUser) {
        self.put_json("user.set", &user_key(user.id), user, self.user_ttl)
            .await;
        self.put_json(
            "user.set_email",
            &user_email_key(&user.email),
            user,
            self.user_ttl,
        )
        .await;
    }

    pub async fn get_user(&self, user_id: uuid::Uuid) -> Option<PublicUser> {
        self.get_json("user.get", &user_key(user_id)).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Option<PublicUser> {
        self.get_json("user.get_email", &user_email_key(email)).await
    }

    /// Cache verified access claims under a digest of the raw token.
    pub async fn store_jwt_claims(&self, token: &str, claims: &AccessClaims) {
        self.put_json("jwt.set", &jwt_key(token), claims, self.jwt_ttl)
            .await;
    }

    /// Cached verified claims for the token, if still unexpired.
    pub async fn get_jwt_claims(&self, token: &str) -> Option<AccessClaims> {
        let key = jwt_key(token);
        let claims: AccessClaims = self.get_json("jwt.get", &key).await?;
        // The cache TTL may outlive the token's own exp; re-check.
        if claims.exp <= Utc::now().timestamp() {
            best_effort("jwt.del", self.store.del(&key).await);
            return None;
        }
        Some(claims)
    }

    /// Drop session + user entries together so a password or role change
    /// cannot be served from stale cache.
    pub async fn invalidate_user(&self, user_id: uuid::Uuid, email: Option<&str>) {
        best_effort("session.del", self.store.del(&session_key(user_id)).await);
        best_effort("user.del", self.store.del(&user_key(user_id)).await);
        if let Some(email) = email {
            best_effort(
                "user.del_email",
                self.store.del(&user_email_key(email)).await,
            );
        }
    }

    /// Number of live session entries; dashboard support.
    pub async fn active_session_count(&self) -> usize {
        best_effort("session.keys", self.store.keys("session:").await)
            .map_or(0, |keys| keys.len())
    }

    async fn put_json<T: Serialize>(
        &self,
        operation: &'static str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) {
        match serde_json::to_string(value) {
            Ok(encoded) => {
                best_effort(operation, self.store.setex(key, ttl, encoded).await);
            }
            Err(err) => warn!(operation, error = %err, "failed to encode cache entry"),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &'static str,
        key: &str,
    ) -> Option<T> {
        let raw = best_effort(operation, self.store.get(key).await).flatten()?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(operation, error = %err, "dropping unreadable cache entry");
                best_effort(operation, self.store.del(key).await);
                None
            }
        }
    }
}
