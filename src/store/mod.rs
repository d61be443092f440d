//! Persistence ports consumed by the auth core.
//!
//! The core never talks to a database directly; it is handed implementations
//! of these traits by the composition root. Row/key atomicity is the only
//! guarantee the core relies on; no multi-key transactions are assumed.

pub mod memory;
pub mod models;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::events::AuthEvent;
use crate::permissions::Role;

pub use models::{
    InsertOutcome, ProfilePatch, Provider, ResourceRecord, UserRecord, WorkspaceMember,
};

/// Row-level access to user records.
///
/// `insert` reports a conflict instead of failing so the unique constraint on
/// `email` stays the final authority for concurrent signups.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn insert(&self, user: UserRecord) -> Result<InsertOutcome>;

    async fn update_profile(&self, id: Uuid, patch: ProfilePatch) -> Result<()>;

    async fn set_password_hash(&self, id: Uuid, password_hash: String) -> Result<()>;

    async fn set_mfa_secret(&self, id: Uuid, secret: Option<String>) -> Result<()>;

    async fn set_backup_codes(&self, id: Uuid, codes: Vec<String>) -> Result<()>;

    async fn set_mfa_enabled(&self, id: Uuid, enabled: bool) -> Result<()>;

    /// Remove `code` from the user's backup codes if present.
    ///
    /// Must be atomic at the store layer (remove-if-present), so two
    /// concurrent redemptions of the same code cannot both succeed.
    async fn consume_backup_code(&self, id: Uuid, code: &str) -> Result<bool>;

    async fn touch_last_active(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// Workspace membership rows: exactly one per `(user_id, workspace_id)`.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn role_of(&self, user_id: Uuid, workspace_id: Uuid) -> Result<Option<Role>>;

    async fn upsert(&self, member: WorkspaceMember) -> Result<()>;

    async fn remove(&self, user_id: Uuid, workspace_id: Uuid) -> Result<()>;

    async fn members_of(&self, workspace_id: Uuid) -> Result<Vec<WorkspaceMember>>;
}

/// Ownership/visibility projections of pages and documents, the only fields
/// the permission engine reads.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_page(&self, id: Uuid) -> Result<Option<ResourceRecord>>;

    async fn get_document(&self, id: Uuid) -> Result<Option<ResourceRecord>>;
}

/// Append-only audit log of authentication events.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: AuthEvent) -> Result<()>;

    /// Events for one user with `timestamp >= since`, oldest first.
    async fn for_user_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<AuthEvent>>;

    /// Events with `timestamp >= since`, optionally restricted to one user.
    async fn since(&self, since: DateTime<Utc>, user_id: Option<Uuid>) -> Result<Vec<AuthEvent>>;

    /// Delete events older than `cutoff`; returns how many were removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
