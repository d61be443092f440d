//! Public-facing user shapes and the single raw-to-sanitized mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::models::{Provider, UserRecord};

/// Sanitized user snapshot handed to callers and written to cache.
///
/// The type simply does not carry credential material, so a forgotten
/// "strip" step cannot leak a password hash or TOTP seed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub provider: Provider,
    pub email_verified: Option<DateTime<Utc>>,
    pub image: Option<String>,
    pub mfa_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// The one mapping from the persisted row to the sanitized snapshot.
#[must_use]
pub fn sanitize_user(user: &UserRecord) -> PublicUser {
    PublicUser {
        id: user.id,
        email: user.email.clone(),
        name: user.name.clone(),
        provider: user.provider,
        email_verified: user.email_verified,
        image: user.image.clone(),
        mfa_enabled: user.mfa_enabled,
        created_at: user.created_at,
        last_active_at: user.last_active_at,
    }
}

/// Input for email/password or OAuth provisioning.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password: Option<String>,
    pub provider: Provider,
    pub provider_id: Option<String>,
    pub image: Option<String>,
}

/// Profile delivered by an OAuth callback.
#[derive(Clone, Debug)]
pub struct OAuthProfile {
    pub email: String,
    pub name: String,
    pub provider: Provider,
    pub provider_id: String,
    pub image: Option<String>,
}

/// Login request from the excluded HTTP layer.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub mfa_token: Option<String>,
    pub workspace_id: Option<Uuid>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Successful authentication: sanitized user plus the token pair.
#[derive(Clone, Debug)]
pub struct AuthSuccess {
    pub user: PublicUser,
    pub token: String,
    pub refresh_token: String,
}

/// A rotated token pair from a refresh-token exchange.
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
}
