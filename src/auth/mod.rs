//! Credential authentication, user provisioning, and MFA enablement.
//!
//! The orchestrator composes the token, MFA, cache, event, and permission
//! services; all of them are injected at construction, so tests substitute
//! in-memory collaborators without touching globals. Every rejection that an
//! attacker can trigger (unknown email, bad password, bad MFA token) is also
//! recorded through the event logger, which is what feeds the anomaly
//! detector on later attempts.

mod models;
mod password;

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde_json::json;
use uuid::Uuid;

use crate::cache::{CachedSession, SessionCache};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthErrorCode, AuthResult};
use crate::events::{AuthEventKind, EventLogger};
use crate::mfa::{MfaService, MfaSetup};
use crate::permissions::{AccessContext, PermissionService, Role};
use crate::store::{InsertOutcome, ProfilePatch, Provider, UserRecord, UserStore};
use crate::token::{AccessClaims, AccessTokenInput, TokenService};

pub use models::{
    sanitize_user, AuthSuccess, Credentials, NewUser, OAuthProfile, PublicUser, TokenPair,
};

/// Basic email shape check; the HTTP layer performs richer validation.
fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

/// The authentication orchestrator consumed by the HTTP layer.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    cache: SessionCache,
    tokens: TokenService,
    mfa: MfaService,
    events: EventLogger,
    permissions: Arc<PermissionService>,
    bcrypt_cost: u32,
}

impl AuthService {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        cache: SessionCache,
        tokens: TokenService,
        mfa: MfaService,
        events: EventLogger,
        permissions: Arc<PermissionService>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            users,
            cache,
            tokens,
            mfa,
            events,
            permissions,
            bcrypt_cost: config.bcrypt_cost(),
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn mfa(&self) -> &MfaService {
        &self.mfa
    }

    #[must_use]
    pub fn events(&self) -> &EventLogger {
        &self.events
    }

    #[must_use]
    pub fn permissions(&self) -> &PermissionService {
        &self.permissions
    }

    /// Authenticate email/password credentials, with an MFA token when the
    /// account requires one.
    ///
    /// # Errors
    /// `USER_NOT_FOUND` for an unknown email, `ACCOUNT_LOCKED` when the
    /// anomaly detector flags the account, `INVALID_CREDENTIALS` for
    /// OAuth-only accounts, `INVALID_PASSWORD` / `MFA_REQUIRED` /
    /// `INVALID_MFA_TOKEN` along the verification path.
    pub async fn authenticate(&self, credentials: Credentials) -> AuthResult<AuthSuccess> {
        let Credentials {
            email,
            password,
            mfa_token,
            workspace_id,
            ip,
            user_agent,
        } = credentials;
        let ip = ip.as_deref();
        let user_agent = user_agent.as_deref();

        let Some(mut user) = self.load_user(&email).await? else {
            self.events
                .log(
                    AuthEventKind::SuspiciousActivity,
                    None,
                    ip,
                    user_agent,
                    json!({ "email": email, "reason": "unknown-email" }),
                )
                .await;
            return Err(AuthError::user_not_found());
        };

        if self.events.detect_suspicious_activity(user.id, ip).await {
            self.events
                .log(
                    AuthEventKind::AccountLocked,
                    Some(user.id),
                    ip,
                    user_agent,
                    json!({ "reason": "suspicious-activity" }),
                )
                .await;
            return Err(AuthError::account_locked());
        }

        // OAuth-only accounts have no password to verify.
        let Some(stored_hash) = user.password_hash.as_deref() else {
            return Err(AuthError::invalid_credentials());
        };
        if !password::verify_password(&password, stored_hash)? {
            self.events
                .log(
                    AuthEventKind::Login,
                    Some(user.id),
                    ip,
                    user_agent,
                    json!({ "success": false, "reason": "invalid-password" }),
                )
                .await;
            return Err(AuthError::invalid_password());
        }

        if user.mfa_enabled {
            let Some(mfa_token) = mfa_token.as_deref() else {
                return Err(AuthError::mfa_required());
            };
            let verified = match user.mfa_secret.as_deref() {
                Some(secret) => self.mfa.verify_mfa(secret, mfa_token),
                None => false,
            };
            // A backup code is accepted in place of a TOTP token.
            let verified =
                verified || self.mfa.verify_backup_code(user.id, mfa_token).await?;
            if !verified {
                self.events
                    .log(
                        AuthEventKind::Login,
                        Some(user.id),
                        ip,
                        user_agent,
                        json!({ "success": false, "reason": "invalid-mfa-token" }),
                    )
                    .await;
                return Err(AuthError::invalid_mfa_token());
            }
        }

        let now = Utc::now();
        self.users
            .touch_last_active(user.id, now)
            .await
            .map_err(|err| AuthError::internal("users.touch_last_active", &err))?;
        user.last_active_at = now;

        let role = self.workspace_role(user.id, workspace_id).await?;
        let token = self.tokens.generate_jwt(&AccessTokenInput {
            user_id: user.id,
            email: user.email.clone(),
            role,
            workspace_id,
        })?;
        let refresh_token = self.tokens.generate_refresh_token(user.id)?;

        let public = sanitize_user(&user);
        self.cache.store_session(&public).await;
        self.cache.store_user(&public).await;
        self.events
            .log(
                AuthEventKind::Login,
                Some(user.id),
                ip,
                user_agent,
                json!({ "success": true, "provider": user.provider.as_str() }),
            )
            .await;

        Ok(AuthSuccess {
            user: public,
            token,
            refresh_token,
        })
    }

    /// Provision a new account.
    ///
    /// The uniqueness pre-check here is fast-path only; the store's unique
    /// constraint remains the final authority under concurrent signups.
    ///
    /// # Errors
    /// `USER_ALREADY_EXISTS` on a duplicate email, `AUTHENTICATION_ERROR`
    /// for an invalid email shape or a store failure.
    pub async fn create_user(&self, new_user: NewUser) -> AuthResult<PublicUser> {
        if !valid_email(&new_user.email) {
            return Err(AuthError::new(
                AuthErrorCode::AuthenticationError,
                "invalid email address",
            ));
        }
        if self
            .users
            .find_by_email(&new_user.email)
            .await
            .map_err(|err| AuthError::internal("users.find_by_email", &err))?
            .is_some()
        {
            return Err(AuthError::user_already_exists());
        }

        let password_hash = match new_user.password.as_deref() {
            Some(password) => Some(password::hash_password(password, self.bcrypt_cost)?),
            None => None,
        };
        let now = Utc::now();
        // Non-email providers arrive with an already-verified address.
        let email_verified = (new_user.provider != Provider::Email).then_some(now);

        let record = UserRecord {
            id: Uuid::new_v4(),
            email: new_user.email,
            name: new_user.name,
            password_hash,
            provider: new_user.provider,
            provider_id: new_user.provider_id,
            email_verified,
            image: new_user.image,
            mfa_enabled: false,
            mfa_secret: None,
            mfa_backup_codes: Vec::new(),
            created_at: now,
            last_active_at: now,
        };
        let public = sanitize_user(&record);
        match self
            .users
            .insert(record)
            .await
            .map_err(|err| AuthError::internal("users.insert", &err))?
        {
            InsertOutcome::Created => Ok(public),
            InsertOutcome::Conflict => Err(AuthError::user_already_exists()),
        }
    }

    /// Idempotent OAuth upsert: an existing user (by email) gets profile
    /// fields refreshed and activity bumped, otherwise a verified user is
    /// created.
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if the store fails.
    pub async fn create_oauth_user(&self, profile: OAuthProfile) -> AuthResult<PublicUser> {
        let now = Utc::now();
        if let Some(existing) = self
            .users
            .find_by_email(&profile.email)
            .await
            .map_err(|err| AuthError::internal("users.find_by_email", &err))?
        {
            self.users
                .update_profile(
                    existing.id,
                    ProfilePatch {
                        name: Some(profile.name),
                        image: profile.image,
                        provider_id: Some(profile.provider_id),
                        email_verified: Some(now),
                        last_active_at: Some(now),
                    },
                )
                .await
                .map_err(|err| AuthError::internal("users.update_profile", &err))?;
            let refreshed = self
                .users
                .find_by_id(existing.id)
                .await
                .map_err(|err| AuthError::internal("users.find_by_id", &err))?
                .ok_or_else(AuthError::user_not_found)?;
            return Ok(sanitize_user(&refreshed));
        }

        self.create_user(NewUser {
            email: profile.email,
            name: profile.name,
            password: None,
            provider: profile.provider,
            provider_id: Some(profile.provider_id),
            image: profile.image,
        })
        .await
    }

    /// Issue a password-reset token for the mailer collaborator.
    ///
    /// Unknown emails return `None` rather than an error, so the endpoint
    /// cannot be used to probe for accounts.
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if the store fails.
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<Option<String>> {
        let Some(user) = self
            .users
            .find_by_email(email)
            .await
            .map_err(|err| AuthError::internal("users.find_by_email", &err))?
        else {
            return Ok(None);
        };
        Ok(Some(
            self.tokens
                .generate_password_reset_token(user.id, &user.email)?,
        ))
    }

    /// Set a new password from a valid reset token.
    ///
    /// # Errors
    /// `INVALID_RESET_TOKEN` for a bad token, `USER_NOT_FOUND` when the
    /// account vanished, `PASSWORD_RESET_FAILED` when the write fails.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        let claims = self.tokens.verify_password_reset_token(token)?;
        let user = self
            .users
            .find_by_id(claims.sub)
            .await
            .map_err(|err| AuthError::internal("users.find_by_id", &err))?
            .ok_or_else(AuthError::user_not_found)?;

        let hash = password::hash_password(new_password, self.bcrypt_cost)?;
        self.users
            .set_password_hash(user.id, hash)
            .await
            .map_err(|err| {
                AuthError::wrap(
                    AuthErrorCode::PasswordResetFailed,
                    "users.set_password_hash",
                    &err,
                )
            })?;

        // Only after the write commits, so a racing read cannot re-cache the
        // old snapshot.
        self.cache.invalidate_user(user.id, Some(&user.email)).await;
        self.events
            .log(
                AuthEventKind::PasswordReset,
                Some(user.id),
                None,
                None,
                json!({}),
            )
            .await;
        Ok(())
    }

    /// Exchange a refresh token for a rotated token pair.
    ///
    /// # Errors
    /// `INVALID_REFRESH_TOKEN` for a bad token, `USER_NOT_FOUND` when the
    /// account vanished.
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        workspace_id: Option<Uuid>,
    ) -> AuthResult<TokenPair> {
        let claims = self.tokens.verify_refresh_token(refresh_token)?;
        let user = self
            .users
            .find_by_id(claims.sub)
            .await
            .map_err(|err| AuthError::internal("users.find_by_id", &err))?
            .ok_or_else(AuthError::user_not_found)?;

        let role = self.workspace_role(user.id, workspace_id).await?;
        let token = self.tokens.generate_jwt(&AccessTokenInput {
            user_id: user.id,
            email: user.email.clone(),
            role,
            workspace_id,
        })?;
        let refresh_token = self.tokens.generate_refresh_token(user.id)?;
        Ok(TokenPair {
            token,
            refresh_token,
        })
    }

    /// Drop the cached session and record the logout.
    pub async fn logout(&self, user_id: Uuid) {
        self.cache.invalidate_session(user_id).await;
        self.events
            .log(AuthEventKind::Logout, Some(user_id), None, None, json!({}))
            .await;
    }

    /// Cached session lookup for the HTTP layer.
    pub async fn get_session(&self, user_id: Uuid) -> Option<CachedSession> {
        self.cache.get_session(user_id).await
    }

    /// Like [`Self::get_session`] but absent/expired sessions are an error.
    ///
    /// # Errors
    /// Returns `SESSION_EXPIRED` when no live session exists.
    pub async fn require_session(&self, user_id: Uuid) -> AuthResult<CachedSession> {
        self.get_session(user_id)
            .await
            .ok_or_else(AuthError::session_expired)
    }

    /// Sign an access token; see [`TokenService::generate_jwt`].
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if signing fails.
    pub fn generate_jwt(&self, input: &AccessTokenInput) -> AuthResult<String> {
        self.tokens.generate_jwt(input)
    }

    /// Verify an access token through the JWT cache.
    ///
    /// Verified claims are cached under a digest of the token; a cache hit
    /// skips signature verification but still honors the embedded expiry.
    ///
    /// # Errors
    /// `EXPIRED_JWT` / `INVALID_JWT` as for [`TokenService::verify_jwt`].
    pub async fn verify_jwt(&self, token: &str) -> AuthResult<AccessClaims> {
        if let Some(claims) = self.cache.get_jwt_claims(token).await {
            return Ok(claims);
        }
        let claims = self.tokens.verify_jwt(token)?;
        self.cache.store_jwt_claims(token, &claims).await;
        Ok(claims)
    }

    /// Begin MFA enrollment; see [`MfaService::setup_mfa`].
    ///
    /// # Errors
    /// As for [`MfaService::setup_mfa`].
    pub async fn setup_mfa(&self, user_id: Uuid) -> AuthResult<MfaSetup> {
        self.mfa.setup_mfa(user_id).await
    }

    /// Confirm MFA enrollment, record it, and drop stale cached snapshots.
    ///
    /// # Errors
    /// As for [`MfaService::enable_mfa`].
    pub async fn enable_mfa(&self, user_id: Uuid, token: &str) -> AuthResult<()> {
        self.mfa.enable_mfa(user_id, token).await?;
        let email = self.email_of(user_id).await;
        self.cache.invalidate_user(user_id, email.as_deref()).await;
        self.events
            .log(
                AuthEventKind::MfaSetup,
                Some(user_id),
                None,
                None,
                json!({ "enabled": true }),
            )
            .await;
        Ok(())
    }

    /// Disable MFA, record it, and drop stale cached snapshots.
    ///
    /// # Errors
    /// As for [`MfaService::disable_mfa`].
    pub async fn disable_mfa(&self, user_id: Uuid) -> AuthResult<()> {
        self.mfa.disable_mfa(user_id).await?;
        let email = self.email_of(user_id).await;
        self.cache.invalidate_user(user_id, email.as_deref()).await;
        self.events
            .log(
                AuthEventKind::MfaSetup,
                Some(user_id),
                None,
                None,
                json!({ "enabled": false }),
            )
            .await;
        Ok(())
    }

    /// Replace the backup-code batch; see
    /// [`MfaService::regenerate_backup_codes`].
    ///
    /// # Errors
    /// As for [`MfaService::regenerate_backup_codes`].
    pub async fn regenerate_backup_codes(&self, user_id: Uuid) -> AuthResult<Vec<String>> {
        self.mfa.regenerate_backup_codes(user_id).await
    }

    /// Evaluate a workspace-scoped permission; see
    /// [`PermissionService::check_permission`].
    ///
    /// # Errors
    /// As for [`PermissionService::check_permission`].
    pub async fn check_permission(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        resource: &str,
        action: &str,
        context: Option<AccessContext>,
    ) -> AuthResult<bool> {
        self.permissions
            .check_permission(user_id, workspace_id, resource, action, context)
            .await
    }

    /// Read-through user lookup: the cached snapshot resolves the id, the
    /// raw record still comes from the store since the cache never holds
    /// credential material.
    async fn load_user(&self, email: &str) -> AuthResult<Option<UserRecord>> {
        if let Some(cached) = self.cache.get_user_by_email(email).await {
            let user = self
                .users
                .find_by_id(cached.id)
                .await
                .map_err(|err| AuthError::internal("users.find_by_id", &err))?;
            if user.is_some() {
                return Ok(user);
            }
        }
        self.users
            .find_by_email(email)
            .await
            .map_err(|err| AuthError::internal("users.find_by_email", &err))
    }

    /// Role carried in the token: the workspace membership role when a
    /// workspace is in scope, otherwise the unprivileged default. Permission
    /// checks always re-resolve membership, so the claim is informational.
    async fn workspace_role(
        &self,
        user_id: Uuid,
        workspace_id: Option<Uuid>,
    ) -> AuthResult<Role> {
        match workspace_id {
            Some(workspace_id) => Ok(self
                .permissions
                .role_in(user_id, workspace_id)
                .await?
                .unwrap_or(Role::Guest)),
            None => Ok(Role::Guest),
        }
    }

    async fn email_of(&self, user_id: Uuid) -> Option<String> {
        self.users
            .find_by_id(user_id)
            .await
            .ok()
            .flatten()
            .map(|user| user.email)
    }
}
