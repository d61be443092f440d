//! Role hierarchy and capability resolution for workspace resources.
//!
//! Roles form a strict total order (owner outranks admin outranks editor
//! outranks viewer outranks guest). Non-owner roles inherit the next-lower
//! role's rules through a linear chain; the full effective rule set per role
//! is resolved once at construction, so a permission check is a scan over a
//! precomputed slice rather than a recursive flatten.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthErrorCode, AuthResult};
use crate::store::{MembershipStore, ResourceStore, UserStore, WorkspaceMember};

pub const WILDCARD: &str = "*";

/// Workspace role. The numeric rank is the privilege order: lower is more
/// powerful.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Editor,
    Viewer,
    Guest,
}

impl Role {
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Owner => 0,
            Self::Admin => 1,
            Self::Editor => 2,
            Self::Viewer => 3,
            Self::Guest => 4,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
            Self::Guest => "guest",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "editor" => Some(Self::Editor),
            "viewer" => Some(Self::Viewer),
            "guest" => Some(Self::Guest),
            _ => None,
        }
    }

    /// Role the receiver inherits rules from, when any.
    fn inherits_from(self) -> Option<Self> {
        match self {
            Self::Owner | Self::Guest => None,
            Self::Admin => Some(Self::Editor),
            Self::Editor => Some(Self::Viewer),
            Self::Viewer => Some(Self::Guest),
        }
    }
}

/// `true` iff `actual` is at least as privileged as `required`.
#[must_use]
pub fn has_minimum_role(actual: Role, required: Role) -> bool {
    actual.rank() <= required.rank()
}

/// Conditions a rule imposes on the evaluation context. A condition that is
/// declared but cannot be proven from the supplied context fails closed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RuleConditions {
    pub requires_owner: bool,
    pub requires_public: bool,
}

/// Facts about the concrete resource under evaluation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AccessContext {
    pub is_owner: bool,
    pub is_public: bool,
}

/// A single capability grant; `*` wildcards both fields.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PermissionRule {
    pub resource: &'static str,
    pub action: &'static str,
    pub conditions: Option<RuleConditions>,
}

const ALWAYS: Option<RuleConditions> = None;
const OWNER_ONLY: Option<RuleConditions> = Some(RuleConditions {
    requires_owner: true,
    requires_public: false,
});
const PUBLIC_ONLY: Option<RuleConditions> = Some(RuleConditions {
    requires_owner: false,
    requires_public: true,
});

const fn rule(
    resource: &'static str,
    action: &'static str,
    conditions: Option<RuleConditions>,
) -> PermissionRule {
    PermissionRule {
        resource,
        action,
        conditions,
    }
}

// Rules a role owns itself; inherited rules are resolved at construction.
const GUEST_RULES: &[PermissionRule] = &[
    rule("page", "read", PUBLIC_ONLY),
    rule("document", "read", PUBLIC_ONLY),
];

const VIEWER_RULES: &[PermissionRule] = &[
    rule("workspace", "read", ALWAYS),
    rule("page", "read", ALWAYS),
    rule("document", "read", ALWAYS),
    rule("comment", "read", ALWAYS),
];

const EDITOR_RULES: &[PermissionRule] = &[
    rule("page", "create", ALWAYS),
    rule("page", "update", ALWAYS),
    rule("page", "delete", OWNER_ONLY),
    rule("document", "create", ALWAYS),
    rule("document", "update", ALWAYS),
    rule("document", "delete", OWNER_ONLY),
    rule("comment", "create", ALWAYS),
    rule("comment", "update", OWNER_ONLY),
    rule("comment", "delete", OWNER_ONLY),
];

const ADMIN_RULES: &[PermissionRule] = &[
    rule("workspace", "update", ALWAYS),
    rule("workspace", "manage-members", ALWAYS),
    rule("page", WILDCARD, ALWAYS),
    rule("document", WILDCARD, ALWAYS),
    rule("comment", WILDCARD, ALWAYS),
];

// Owner is not expressed as individual rules: it matches everything.
const OWNER_RULES: &[PermissionRule] = &[rule(WILDCARD, WILDCARD, ALWAYS)];

fn own_rules(role: Role) -> &'static [PermissionRule] {
    match role {
        Role::Owner => OWNER_RULES,
        Role::Admin => ADMIN_RULES,
        Role::Editor => EDITOR_RULES,
        Role::Viewer => VIEWER_RULES,
        Role::Guest => GUEST_RULES,
    }
}

fn conditions_match(conditions: Option<RuleConditions>, context: Option<AccessContext>) -> bool {
    let Some(conditions) = conditions else {
        return true;
    };
    // Declared conditions with no context fail closed.
    let Some(context) = context else {
        return false;
    };
    (!conditions.requires_owner || context.is_owner)
        && (!conditions.requires_public || context.is_public)
}

/// Resolves membership roles and evaluates capability rules.
pub struct PermissionService {
    users: Arc<dyn UserStore>,
    membership: Arc<dyn MembershipStore>,
    resources: Arc<dyn ResourceStore>,
    effective: HashMap<Role, Vec<PermissionRule>>,
}

impl PermissionService {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        membership: Arc<dyn MembershipStore>,
        resources: Arc<dyn ResourceStore>,
    ) -> Self {
        let mut effective = HashMap::new();
        for role in [Role::Owner, Role::Admin, Role::Editor, Role::Viewer, Role::Guest] {
            let mut rules = Vec::new();
            let mut cursor = Some(role);
            while let Some(current) = cursor {
                rules.extend_from_slice(own_rules(current));
                cursor = current.inherits_from();
            }
            effective.insert(role, rules);
        }
        Self {
            users,
            membership,
            resources,
            effective,
        }
    }

    /// Pure rule evaluation for an already-resolved role.
    ///
    /// Candidates are tried in order: the universal wildcard, a
    /// resource-specific wildcard action, then the exact pair.
    #[must_use]
    pub fn has_permission(
        &self,
        role: Role,
        resource: &str,
        action: &str,
        context: Option<AccessContext>,
    ) -> bool {
        let Some(rules) = self.effective.get(&role) else {
            return false;
        };
        [(WILDCARD, WILDCARD), (resource, WILDCARD), (resource, action)]
            .iter()
            .any(|(wanted_resource, wanted_action)| {
                rules.iter().any(|rule| {
                    rule.resource == *wanted_resource
                        && rule.action == *wanted_action
                        && conditions_match(rule.conditions, context)
                })
            })
    }

    /// Resolve the caller's workspace role and evaluate the rule set.
    ///
    /// Users without a membership are evaluated as `guest`, which only
    /// matches pre-declared public-visible grants.
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if the membership store fails.
    pub async fn check_permission(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        resource: &str,
        action: &str,
        context: Option<AccessContext>,
    ) -> AuthResult<bool> {
        let role = self
            .membership
            .role_of(user_id, workspace_id)
            .await
            .map_err(|err| AuthError::internal("membership.role_of", &err))?
            .unwrap_or(Role::Guest);
        Ok(self.has_permission(role, resource, action, context))
    }

    /// Membership role of a user in a workspace, if any.
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if the membership store fails.
    pub async fn role_in(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
    ) -> AuthResult<Option<Role>> {
        self.membership
            .role_of(user_id, workspace_id)
            .await
            .map_err(|err| AuthError::internal("membership.role_of", &err))
    }

    /// Check `action` on a page, deriving ownership and visibility from the
    /// page record. Unknown pages simply yield `false`.
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if a store fails.
    pub async fn check_page_permission(
        &self,
        user_id: Uuid,
        page_id: Uuid,
        action: &str,
    ) -> AuthResult<bool> {
        let page = self
            .resources
            .get_page(page_id)
            .await
            .map_err(|err| AuthError::internal("resources.get_page", &err))?;
        match page {
            Some(page) => {
                let context = AccessContext {
                    is_owner: page.created_by == user_id,
                    is_public: page.is_public,
                };
                self.check_permission(user_id, page.workspace_id, "page", action, Some(context))
                    .await
            }
            None => Ok(false),
        }
    }

    /// Check `action` on a document; see [`Self::check_page_permission`].
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if a store fails.
    pub async fn check_document_permission(
        &self,
        user_id: Uuid,
        document_id: Uuid,
        action: &str,
    ) -> AuthResult<bool> {
        let document = self
            .resources
            .get_document(document_id)
            .await
            .map_err(|err| AuthError::internal("resources.get_document", &err))?;
        match document {
            Some(document) => {
                let context = AccessContext {
                    is_owner: document.created_by == user_id,
                    is_public: document.is_public,
                };
                self.check_permission(
                    user_id,
                    document.workspace_id,
                    "document",
                    action,
                    Some(context),
                )
                .await
            }
            None => Ok(false),
        }
    }

    /// List a workspace's members; requires `workspace read`.
    ///
    /// # Errors
    /// Returns `PERMISSION_DENIED` when the actor cannot read the workspace,
    /// `AUTHENTICATION_ERROR` if a store fails.
    pub async fn list_workspace_members(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
    ) -> AuthResult<Vec<WorkspaceMember>> {
        if !self
            .check_permission(actor_id, workspace_id, "workspace", "read", None)
            .await?
        {
            return Err(AuthError::permission_denied());
        }
        self.membership
            .members_of(workspace_id)
            .await
            .map_err(|err| AuthError::internal("membership.members_of", &err))
    }

    /// Add a user (looked up by email) to a workspace.
    ///
    /// # Errors
    /// `PERMISSION_DENIED` when the actor lacks `manage-members` or grants
    /// `owner` without being owner; `USER_NOT_FOUND` for an unknown email;
    /// `USER_ALREADY_EXISTS` when the user is already a member.
    pub async fn invite_user_to_workspace(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        email: &str,
        role: Role,
    ) -> AuthResult<WorkspaceMember> {
        let actor_role = self.require_manage_members(actor_id, workspace_id).await?;
        if role == Role::Owner && actor_role != Role::Owner {
            return Err(AuthError::permission_denied());
        }

        let invitee = self
            .users
            .find_by_email(email)
            .await
            .map_err(|err| AuthError::internal("users.find_by_email", &err))?
            .ok_or_else(AuthError::user_not_found)?;

        let existing = self
            .membership
            .role_of(invitee.id, workspace_id)
            .await
            .map_err(|err| AuthError::internal("membership.role_of", &err))?;
        if existing.is_some() {
            return Err(AuthError::new(
                AuthErrorCode::UserAlreadyExists,
                "the user is already a member of this workspace",
            ));
        }

        let member = WorkspaceMember {
            user_id: invitee.id,
            workspace_id,
            role,
        };
        self.membership
            .upsert(member)
            .await
            .map_err(|err| AuthError::internal("membership.upsert", &err))?;
        Ok(member)
    }

    /// Change an existing member's role.
    ///
    /// # Errors
    /// `PERMISSION_DENIED` when the actor lacks `manage-members`, changes
    /// their own role without being owner, or grants `owner` without being
    /// owner; `USER_NOT_FOUND` when the target is not a member.
    pub async fn update_member_role(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        member_id: Uuid,
        new_role: Role,
    ) -> AuthResult<()> {
        let actor_role = self.require_manage_members(actor_id, workspace_id).await?;
        if member_id == actor_id && actor_role != Role::Owner {
            return Err(AuthError::permission_denied());
        }
        if new_role == Role::Owner && actor_role != Role::Owner {
            return Err(AuthError::permission_denied());
        }

        let current = self
            .membership
            .role_of(member_id, workspace_id)
            .await
            .map_err(|err| AuthError::internal("membership.role_of", &err))?;
        if current.is_none() {
            return Err(AuthError::user_not_found());
        }

        self.membership
            .upsert(WorkspaceMember {
                user_id: member_id,
                workspace_id,
                role: new_role,
            })
            .await
            .map_err(|err| AuthError::internal("membership.upsert", &err))
    }

    /// Remove a member from a workspace. Owner members can never be removed
    /// through this path.
    ///
    /// # Errors
    /// `PERMISSION_DENIED` when the actor lacks `manage-members` or targets
    /// an owner; `USER_NOT_FOUND` when the target is not a member.
    pub async fn remove_member_from_workspace(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        member_id: Uuid,
    ) -> AuthResult<()> {
        self.require_manage_members(actor_id, workspace_id).await?;

        let target_role = self
            .membership
            .role_of(member_id, workspace_id)
            .await
            .map_err(|err| AuthError::internal("membership.role_of", &err))?
            .ok_or_else(AuthError::user_not_found)?;
        if target_role == Role::Owner {
            return Err(AuthError::permission_denied());
        }

        self.membership
            .remove(member_id, workspace_id)
            .await
            .map_err(|err| AuthError::internal("membership.remove", &err))
    }

    async fn require_manage_members(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
    ) -> AuthResult<Role> {
        let actor_role = self
            .membership
            .role_of(actor_id, workspace_id)
            .await
            .map_err(|err| AuthError::internal("membership.role_of", &err))?
            .unwrap_or(Role::Guest);
        if !self.has_permission(actor_role, "workspace", "manage-members", None) {
            return Err(AuthError::permission_denied());
        }
        Ok(actor_role)
    }
}
