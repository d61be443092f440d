//! Tagged error type shared by every service in the crate.
//!
//! Callers pattern-match on [`AuthErrorCode`], never on message text. Messages
//! are deliberately generic: collaborator failures are logged through
//! `tracing` and wrapped, so internal error text (connection strings, raw
//! driver output) can never reach a client response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine-readable failure codes.
///
/// The HTTP layer owns the mapping from code to status; nothing here is
/// HTTP-shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    InvalidCredentials,
    MfaRequired,
    InvalidMfaToken,
    UserNotFound,
    InvalidPassword,
    AccountLocked,
    AuthenticationError,
    InvalidJwt,
    ExpiredJwt,
    InvalidRefreshToken,
    UserAlreadyExists,
    MfaSetupFailed,
    MfaEnableFailed,
    MfaDisableFailed,
    InvalidResetToken,
    PasswordResetFailed,
    PermissionDenied,
    SessionExpired,
}

impl AuthErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::MfaRequired => "MFA_REQUIRED",
            Self::InvalidMfaToken => "INVALID_MFA_TOKEN",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::InvalidPassword => "INVALID_PASSWORD",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::InvalidJwt => "INVALID_JWT",
            Self::ExpiredJwt => "EXPIRED_JWT",
            Self::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            Self::UserAlreadyExists => "USER_ALREADY_EXISTS",
            Self::MfaSetupFailed => "MFA_SETUP_FAILED",
            Self::MfaEnableFailed => "MFA_ENABLE_FAILED",
            Self::MfaDisableFailed => "MFA_DISABLE_FAILED",
            Self::InvalidResetToken => "INVALID_RESET_TOKEN",
            Self::PasswordResetFailed => "PASSWORD_RESET_FAILED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::SessionExpired => "SESSION_EXPIRED",
        }
    }
}

impl std::fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain failure carrying a stable code, a generic message, and optional
/// structured details (e.g. the expiry timestamp of an expired token).
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct AuthError {
    code: AuthErrorCode,
    message: String,
    details: Option<serde_json::Value>,
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    #[must_use]
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn code(&self) -> AuthErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

    pub(crate) fn invalid_credentials() -> Self {
        Self::new(AuthErrorCode::InvalidCredentials, "invalid credentials")
    }

    pub(crate) fn mfa_required() -> Self {
        Self::new(
            AuthErrorCode::MfaRequired,
            "a multi-factor authentication token is required",
        )
    }

    pub(crate) fn invalid_mfa_token() -> Self {
        Self::new(
            AuthErrorCode::InvalidMfaToken,
            "the multi-factor authentication token is not valid",
        )
    }

    pub(crate) fn user_not_found() -> Self {
        Self::new(AuthErrorCode::UserNotFound, "user not found")
    }

    pub(crate) fn invalid_password() -> Self {
        Self::new(AuthErrorCode::InvalidPassword, "the password is not correct")
    }

    pub(crate) fn account_locked() -> Self {
        Self::new(
            AuthErrorCode::AccountLocked,
            "the account is temporarily locked due to suspicious activity",
        )
    }

    pub(crate) fn user_already_exists() -> Self {
        Self::new(
            AuthErrorCode::UserAlreadyExists,
            "a user with this email already exists",
        )
    }

    pub(crate) fn permission_denied() -> Self {
        Self::new(AuthErrorCode::PermissionDenied, "permission denied")
    }

    pub(crate) fn session_expired() -> Self {
        Self::new(AuthErrorCode::SessionExpired, "the session has expired")
    }

    /// Wrap an unexpected collaborator failure.
    ///
    /// The underlying error is logged, not embedded: the returned message
    /// stays generic so internal state never leaks through a response body.
    pub(crate) fn internal(operation: &'static str, err: &anyhow::Error) -> Self {
        tracing::error!(operation, error = %err, "unexpected internal failure");
        Self::new(AuthErrorCode::AuthenticationError, "authentication failed")
    }

    /// Like [`AuthError::internal`] but tagged with a specific failure code
    /// for operations whose wrapper code is part of the public contract.
    pub(crate) fn wrap(
        code: AuthErrorCode,
        operation: &'static str,
        err: &anyhow::Error,
    ) -> Self {
        tracing::error!(operation, error = %err, "operation failed");
        Self::new(code, "the operation could not be completed")
    }
}
