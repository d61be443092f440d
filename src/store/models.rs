//! Persisted record shapes shared across the store ports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permissions::Role;

/// Identity provider a user signed up with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Email,
    Google,
    Github,
}

impl Provider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Google => "google",
            Self::Github => "github",
        }
    }
}

/// The raw persisted user row.
///
/// This is the only type in the crate that carries credential material
/// (password hash, TOTP seed, backup codes). It is deliberately distinct
/// from the sanitized [`crate::auth::PublicUser`]; the one mapping between
/// them lives in `auth::models`.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: Option<String>,
    pub provider: Provider,
    pub provider_id: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
    pub image: Option<String>,
    pub mfa_enabled: bool,
    pub mfa_secret: Option<String>,
    pub mfa_backup_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// Outcome of an insert that may hit the unique email constraint.
#[derive(Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    Created,
    Conflict,
}

/// Profile fields refreshed on OAuth sign-in; `None` leaves a field as-is.
#[derive(Clone, Debug, Default)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub image: Option<String>,
    pub provider_id: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// One workspace membership row.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMember {
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub role: Role,
}

/// Ownership/visibility projection of a page or document.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResourceRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub created_by: Uuid,
    pub is_public: bool,
}
