//! In-memory store implementations.
//!
//! Used by the test suite and by embedders that want the core running
//! without external persistence (demos, single-node trials). Locks are never
//! held across an await point.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::events::AuthEvent;
use crate::permissions::Role;

use super::models::{
    InsertOutcome, ProfilePatch, ResourceRecord, UserRecord, WorkspaceMember,
};
use super::{EventStore, MembershipStore, ResourceStore, UserStore};

/// Hash-map backed [`UserStore`] with the same unique-email semantics a
/// relational store enforces through a constraint.
#[derive(Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, UserRecord>>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_user<T>(&self, id: Uuid, apply: impl FnOnce(&mut UserRecord) -> T) -> Result<T> {
        let mut users = self.users.write();
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("user {id} not found"))?;
        Ok(apply(user))
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn insert(&self, user: UserRecord) -> Result<InsertOutcome> {
        let mut users = self.users.write();
        if users.values().any(|existing| existing.email == user.email) {
            return Ok(InsertOutcome::Conflict);
        }
        users.insert(user.id, user);
        Ok(InsertOutcome::Created)
    }

    async fn update_profile(&self, id: Uuid, patch: ProfilePatch) -> Result<()> {
        self.with_user(id, |user| {
            if let Some(name) = patch.name {
                user.name = name;
            }
            if let Some(image) = patch.image {
                user.image = Some(image);
            }
            if let Some(provider_id) = patch.provider_id {
                user.provider_id = Some(provider_id);
            }
            if let Some(verified) = patch.email_verified {
                user.email_verified = Some(verified);
            }
            if let Some(active) = patch.last_active_at {
                user.last_active_at = active;
            }
        })
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: String) -> Result<()> {
        self.with_user(id, |user| user.password_hash = Some(password_hash))
    }

    async fn set_mfa_secret(&self, id: Uuid, secret: Option<String>) -> Result<()> {
        self.with_user(id, |user| user.mfa_secret = secret)
    }

    async fn set_backup_codes(&self, id: Uuid, codes: Vec<String>) -> Result<()> {
        self.with_user(id, |user| user.mfa_backup_codes = codes)
    }

    async fn set_mfa_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        self.with_user(id, |user| user.mfa_enabled = enabled)
    }

    async fn consume_backup_code(&self, id: Uuid, code: &str) -> Result<bool> {
        // Single write lock makes the remove-if-present atomic.
        self.with_user(id, |user| {
            let before = user.mfa_backup_codes.len();
            user.mfa_backup_codes
                .retain(|candidate| !candidate.eq_ignore_ascii_case(code));
            user.mfa_backup_codes.len() < before
        })
    }

    async fn touch_last_active(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.with_user(id, |user| user.last_active_at = at)
    }
}

/// Hash-map backed [`MembershipStore`] keyed by `(user_id, workspace_id)`.
#[derive(Clone, Default)]
pub struct MemoryMembershipStore {
    members: Arc<RwLock<HashMap<(Uuid, Uuid), Role>>>,
}

impl MemoryMembershipStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn role_of(&self, user_id: Uuid, workspace_id: Uuid) -> Result<Option<Role>> {
        Ok(self.members.read().get(&(user_id, workspace_id)).copied())
    }

    async fn upsert(&self, member: WorkspaceMember) -> Result<()> {
        self.members
            .write()
            .insert((member.user_id, member.workspace_id), member.role);
        Ok(())
    }

    async fn remove(&self, user_id: Uuid, workspace_id: Uuid) -> Result<()> {
        self.members.write().remove(&(user_id, workspace_id));
        Ok(())
    }

    async fn members_of(&self, workspace_id: Uuid) -> Result<Vec<WorkspaceMember>> {
        Ok(self
            .members
            .read()
            .iter()
            .filter(|((_, ws), _)| *ws == workspace_id)
            .map(|((user_id, ws), role)| WorkspaceMember {
                user_id: *user_id,
                workspace_id: *ws,
                role: *role,
            })
            .collect())
    }
}

/// Page/document ownership projections held in memory.
#[derive(Clone, Default)]
pub struct MemoryResourceStore {
    pages: Arc<RwLock<HashMap<Uuid, ResourceRecord>>>,
    documents: Arc<RwLock<HashMap<Uuid, ResourceRecord>>>,
}

impl MemoryResourceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(&self, record: ResourceRecord) {
        self.pages.write().insert(record.id, record);
    }

    pub fn insert_document(&self, record: ResourceRecord) {
        self.documents.write().insert(record.id, record);
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn get_page(&self, id: Uuid) -> Result<Option<ResourceRecord>> {
        Ok(self.pages.read().get(&id).copied())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<ResourceRecord>> {
        Ok(self.documents.read().get(&id).copied())
    }
}

/// Append-only event log held in memory.
#[derive(Clone, Default)]
pub struct MemoryEventStore {
    events: Arc<RwLock<Vec<AuthEvent>>>,
}

impl MemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events; test-support helper.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: AuthEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn for_user_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuthEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|event| event.user_id == Some(user_id) && event.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn since(
        &self,
        since: DateTime<Utc>,
        user_id: Option<Uuid>,
    ) -> Result<Vec<AuthEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|event| {
                event.timestamp >= since
                    && user_id.map_or(true, |wanted| event.user_id == Some(wanted))
            })
            .cloned()
            .collect())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|event| event.timestamp >= cutoff);
        Ok((before - events.len()) as u64)
    }
}
