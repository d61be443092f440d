//! TOTP-based multi-factor authentication.
//!
//! Per-user state machine: disabled, then secret-provisioned by
//! [`MfaService::setup_mfa`], then enabled by [`MfaService::enable_mfa`];
//! [`MfaService::disable_mfa`] returns to disabled and clears the secret and
//! backup codes. The secret is persisted during setup, before MFA is
//! enabled, so enabling can verify the very first token against it.

mod backup;

use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthErrorCode, AuthResult};
use crate::store::UserStore;

const TOTP_DIGITS: usize = 6;
const TOTP_SECRET_BYTES: usize = 32;

/// Provisioning material returned from setup: shown to the user exactly
/// once, never readable again through the API.
#[derive(Clone, Debug)]
pub struct MfaSetup {
    pub secret: String,
    pub otpauth_url: String,
    pub qr_code: String,
    pub backup_codes: Vec<String>,
}

/// TOTP secret provisioning, token verification, and backup codes.
#[derive(Clone)]
pub struct MfaService {
    users: Arc<dyn UserStore>,
    issuer: String,
    skew: u8,
    step: u64,
    backup_code_count: usize,
}

impl MfaService {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, config: &AuthConfig) -> Self {
        Self {
            users,
            issuer: config.totp_issuer().to_string(),
            skew: config.totp_skew(),
            step: config.totp_step(),
            backup_code_count: config.backup_code_count(),
        }
    }

    /// Begin enrollment: generate a secret and backup codes, persist them,
    /// and return the provisioning material (base32 secret, otpauth URL,
    /// QR data URL).
    ///
    /// # Errors
    /// `USER_NOT_FOUND` for an unknown user, `MFA_SETUP_FAILED` when secret
    /// generation, QR rendering, or persistence fails.
    pub async fn setup_mfa(&self, user_id: Uuid) -> AuthResult<MfaSetup> {
        let user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(|err| AuthError::internal("users.find_by_id", &err))?
            .ok_or_else(AuthError::user_not_found)?;

        let mut seed = [0u8; TOTP_SECRET_BYTES];
        OsRng.try_fill_bytes(&mut seed).map_err(|err| {
            AuthError::wrap(
                AuthErrorCode::MfaSetupFailed,
                "mfa.generate_secret",
                &err.into(),
            )
        })?;

        let totp = self.totp(seed.to_vec(), &user.email).map_err(|err| {
            AuthError::wrap(AuthErrorCode::MfaSetupFailed, "mfa.build_totp", &err)
        })?;
        let secret = totp.get_secret_base32();
        let otpauth_url = totp.get_url();
        let qr = totp.get_qr_base64().map_err(|err| {
            AuthError::wrap(
                AuthErrorCode::MfaSetupFailed,
                "mfa.render_qr",
                &anyhow::anyhow!(err),
            )
        })?;

        let backup_codes =
            backup::generate_backup_codes(self.backup_code_count).map_err(|err| {
                AuthError::wrap(AuthErrorCode::MfaSetupFailed, "mfa.backup_codes", &err)
            })?;

        // Persisted pre-enable so enable_mfa can check the first token.
        self.users
            .set_mfa_secret(user_id, Some(secret.clone()))
            .await
            .map_err(|err| {
                AuthError::wrap(AuthErrorCode::MfaSetupFailed, "users.set_mfa_secret", &err)
            })?;
        self.users
            .set_backup_codes(user_id, backup_codes.clone())
            .await
            .map_err(|err| {
                AuthError::wrap(AuthErrorCode::MfaSetupFailed, "users.set_backup_codes", &err)
            })?;

        Ok(MfaSetup {
            secret,
            otpauth_url,
            qr_code: format!("data:image/png;base64,{qr}"),
            backup_codes,
        })
    }

    /// Confirm enrollment by verifying the first token, then flip the
    /// enabled flag.
    ///
    /// # Errors
    /// `USER_NOT_FOUND` for an unknown user, `MFA_SETUP_FAILED` when setup
    /// never ran, `INVALID_MFA_TOKEN` for a bad token, `MFA_ENABLE_FAILED`
    /// when persistence fails.
    pub async fn enable_mfa(&self, user_id: Uuid, token: &str) -> AuthResult<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(|err| AuthError::internal("users.find_by_id", &err))?
            .ok_or_else(AuthError::user_not_found)?;

        let Some(secret) = user.mfa_secret else {
            return Err(AuthError::new(
                AuthErrorCode::MfaSetupFailed,
                "multi-factor setup has not been completed",
            ));
        };

        if !self.verify_mfa(&secret, token) {
            return Err(AuthError::invalid_mfa_token());
        }

        self.users
            .set_mfa_enabled(user_id, true)
            .await
            .map_err(|err| {
                AuthError::wrap(AuthErrorCode::MfaEnableFailed, "users.set_mfa_enabled", &err)
            })
    }

    /// Pure token check against a base32 secret, within the configured
    /// step window. Never errors: anything unverifiable is simply `false`.
    #[must_use]
    pub fn verify_mfa(&self, secret_base32: &str, token: &str) -> bool {
        let Ok(seed) = Secret::Encoded(secret_base32.to_string()).to_bytes() else {
            return false;
        };
        // Account label does not participate in verification.
        let Ok(totp) = self.totp(seed, "user") else {
            return false;
        };
        totp.check_current(token).unwrap_or(false)
    }

    /// Redeem a backup code: case-insensitive, removed on first use.
    ///
    /// Returns `false` (not an error) for a malformed or unknown code.
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if the store fails.
    pub async fn verify_backup_code(&self, user_id: Uuid, code: &str) -> AuthResult<bool> {
        let Some(normalized) = backup::normalize_backup_code(code) else {
            return Ok(false);
        };
        self.users
            .consume_backup_code(user_id, &normalized)
            .await
            .map_err(|err| AuthError::internal("users.consume_backup_code", &err))
    }

    /// Replace the backup code batch; only valid once MFA is enabled.
    ///
    /// # Errors
    /// `USER_NOT_FOUND` for an unknown user, `MFA_REQUIRED` when MFA is not
    /// enabled.
    pub async fn regenerate_backup_codes(&self, user_id: Uuid) -> AuthResult<Vec<String>> {
        let user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(|err| AuthError::internal("users.find_by_id", &err))?
            .ok_or_else(AuthError::user_not_found)?;
        if !user.mfa_enabled {
            return Err(AuthError::mfa_required());
        }

        let codes = backup::generate_backup_codes(self.backup_code_count)
            .map_err(|err| AuthError::internal("mfa.backup_codes", &err))?;
        self.users
            .set_backup_codes(user_id, codes.clone())
            .await
            .map_err(|err| AuthError::internal("users.set_backup_codes", &err))?;
        Ok(codes)
    }

    /// Return to the disabled state, clearing the secret and backup codes.
    ///
    /// # Errors
    /// `USER_NOT_FOUND` for an unknown user, `MFA_DISABLE_FAILED` when
    /// persistence fails.
    pub async fn disable_mfa(&self, user_id: Uuid) -> AuthResult<()> {
        self.users
            .find_by_id(user_id)
            .await
            .map_err(|err| AuthError::internal("users.find_by_id", &err))?
            .ok_or_else(AuthError::user_not_found)?;

        let wrap = |err: anyhow::Error| {
            AuthError::wrap(AuthErrorCode::MfaDisableFailed, "users.disable_mfa", &err)
        };
        // Flag first: the secret may not outlive an enabled flag.
        self.users
            .set_mfa_enabled(user_id, false)
            .await
            .map_err(wrap)?;
        self.users.set_mfa_secret(user_id, None).await.map_err(wrap)?;
        self.users
            .set_backup_codes(user_id, Vec::new())
            .await
            .map_err(wrap)?;
        Ok(())
    }

    fn totp(&self, seed: Vec<u8>, account: &str) -> anyhow::Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            self.skew,
            self.step,
            seed,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|err| anyhow::anyhow!("TOTP init error: {err}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryUserStore;
    use crate::store::models::{Provider, UserRecord};
    use chrono::Utc;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn service(users: Arc<MemoryUserStore>) -> MfaService {
        MfaService::new(users, &AuthConfig::new("mfa-test-secret"))
    }

    async fn add_user(users: &MemoryUserStore) -> Uuid {
        let now = Utc::now();
        let user = UserRecord {
            id: Uuid::new_v4(),
            email: "a@b.com".to_string(),
            name: "A".to_string(),
            password_hash: None,
            provider: Provider::Email,
            provider_id: None,
            email_verified: None,
            image: None,
            mfa_enabled: false,
            mfa_secret: None,
            mfa_backup_codes: Vec::new(),
            created_at: now,
            last_active_at: now,
        };
        let id = user.id;
        users.insert(user).await.unwrap();
        id
    }

    fn current_token(secret_base32: &str) -> String {
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            2,
            30,
            Secret::Encoded(secret_base32.to_string()).to_bytes().unwrap(),
            None,
            "test".to_string(),
        )
        .unwrap();
        totp.generate_current().unwrap()
    }

    fn token_at_offset(secret_base32: &str, offset_seconds: i64) -> String {
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            2,
            30,
            Secret::Encoded(secret_base32.to_string()).to_bytes().unwrap(),
            None,
            "test".to_string(),
        )
        .unwrap();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        totp.generate((now + offset_seconds) as u64)
    }

    #[tokio::test]
    async fn setup_provisions_secret_and_backup_codes() {
        let users = Arc::new(MemoryUserStore::new());
        let mfa = service(users.clone());
        let user_id = add_user(&users).await;

        let setup = mfa.setup_mfa(user_id).await.unwrap();
        assert!(!setup.secret.is_empty());
        assert!(setup.qr_code.starts_with("data:image/png;base64,"));
        assert!(setup.otpauth_url.starts_with("otpauth://totp/"));
        assert_eq!(setup.backup_codes.len(), 8);

        // The secret is persisted even though MFA is not yet enabled.
        let stored = users.find_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(stored.mfa_secret.as_deref(), Some(setup.secret.as_str()));
        assert!(!stored.mfa_enabled);
    }

    #[tokio::test]
    async fn setup_for_unknown_user_fails() {
        let mfa = service(Arc::new(MemoryUserStore::new()));
        let err = mfa.setup_mfa(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::UserNotFound);
    }

    #[tokio::test]
    async fn enable_requires_prior_setup() {
        let users = Arc::new(MemoryUserStore::new());
        let mfa = service(users.clone());
        let user_id = add_user(&users).await;

        let err = mfa.enable_mfa(user_id, "123456").await.unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::MfaSetupFailed);
    }

    #[tokio::test]
    async fn enable_verifies_the_first_token() {
        let users = Arc::new(MemoryUserStore::new());
        let mfa = service(users.clone());
        let user_id = add_user(&users).await;
        let setup = mfa.setup_mfa(user_id).await.unwrap();

        let err = mfa.enable_mfa(user_id, "000000").await.unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::InvalidMfaToken);

        mfa.enable_mfa(user_id, &current_token(&setup.secret))
            .await
            .unwrap();
        let stored = users.find_by_id(user_id).await.unwrap().unwrap();
        assert!(stored.mfa_enabled);
    }

    #[tokio::test]
    async fn verify_accepts_tokens_within_the_window() {
        let users = Arc::new(MemoryUserStore::new());
        let mfa = service(users.clone());
        let user_id = add_user(&users).await;
        let setup = mfa.setup_mfa(user_id).await.unwrap();

        assert!(mfa.verify_mfa(&setup.secret, &current_token(&setup.secret)));
        // Two steps of drift are tolerated...
        assert!(mfa.verify_mfa(&setup.secret, &token_at_offset(&setup.secret, -60)));
        // ...five are not.
        assert!(!mfa.verify_mfa(&setup.secret, &token_at_offset(&setup.secret, -150)));
    }

    #[test]
    fn verify_never_errors_on_garbage() {
        let mfa = service(Arc::new(MemoryUserStore::new()));
        assert!(!mfa.verify_mfa("%%%not-base32%%%", "123456"));
        assert!(!mfa.verify_mfa("JBSWY3DPEHPK3PXP", "not-digits"));
    }

    #[tokio::test]
    async fn backup_codes_are_single_use() {
        let users = Arc::new(MemoryUserStore::new());
        let mfa = service(users.clone());
        let user_id = add_user(&users).await;
        let setup = mfa.setup_mfa(user_id).await.unwrap();
        let code = setup.backup_codes[0].clone();

        assert!(mfa
            .verify_backup_code(user_id, &code.to_lowercase())
            .await
            .unwrap());
        assert!(!mfa.verify_backup_code(user_id, &code).await.unwrap());
        // Remaining codes stay valid.
        assert!(mfa
            .verify_backup_code(user_id, &setup.backup_codes[1])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn malformed_backup_codes_are_false_not_errors() {
        let users = Arc::new(MemoryUserStore::new());
        let mfa = service(users.clone());
        let user_id = add_user(&users).await;

        assert!(!mfa.verify_backup_code(user_id, "nope").await.unwrap());
        assert!(!mfa.verify_backup_code(user_id, "").await.unwrap());
    }

    #[tokio::test]
    async fn regenerate_requires_enabled_mfa() {
        let users = Arc::new(MemoryUserStore::new());
        let mfa = service(users.clone());
        let user_id = add_user(&users).await;
        let setup = mfa.setup_mfa(user_id).await.unwrap();

        let err = mfa.regenerate_backup_codes(user_id).await.unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::MfaRequired);

        mfa.enable_mfa(user_id, &current_token(&setup.secret))
            .await
            .unwrap();
        let fresh = mfa.regenerate_backup_codes(user_id).await.unwrap();
        assert_eq!(fresh.len(), 8);
        // Old batch no longer redeems.
        assert!(!mfa
            .verify_backup_code(user_id, &setup.backup_codes[0])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn disable_clears_secret_and_codes() {
        let users = Arc::new(MemoryUserStore::new());
        let mfa = service(users.clone());
        let user_id = add_user(&users).await;
        let setup = mfa.setup_mfa(user_id).await.unwrap();
        mfa.enable_mfa(user_id, &current_token(&setup.secret))
            .await
            .unwrap();

        mfa.disable_mfa(user_id).await.unwrap();
        let stored = users.find_by_id(user_id).await.unwrap().unwrap();
        assert!(!stored.mfa_enabled);
        assert!(stored.mfa_secret.is_none());
        assert!(stored.mfa_backup_codes.is_empty());
    }
}
