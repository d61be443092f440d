//! Stateless JWT, refresh-token, and password-reset-token lifecycle.
//!
//! Two tiers are deliberately kept apart: `verify_*` checks the signature and
//! the registered claims and is the only path allowed to feed authorization,
//! while `decode_jwt` reads claims without verification and exists purely for
//! expiry introspection.

use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthErrorCode, AuthResult};
use crate::permissions::Role;

pub const TOKEN_TYPE_REFRESH: &str = "refresh";
pub const TOKEN_TYPE_PASSWORD_RESET: &str = "password-reset";

/// Input for a fresh access token.
#[derive(Clone, Debug)]
pub struct AccessTokenInput {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub workspace_id: Option<Uuid>,
}

/// Verified access-token claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Uuid>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Verified refresh-token claims. The `token_type` discriminant is
/// authoritative: it is checked even though deserialization alone would
/// already reject an access token here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Verified password-reset-token claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetClaims {
    pub sub: Uuid,
    pub email: String,
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Claims read without signature verification. Only suitable for expiry
/// introspection; never for access decisions.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UnverifiedClaims {
    #[serde(default)]
    pub sub: Option<Uuid>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Issues and verifies all three token kinds with a single HS256 secret.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    reset_ttl_seconds: i64,
}

impl TokenService {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret().expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: config.jwt_issuer().to_string(),
            audience: config.jwt_audience().to_string(),
            access_ttl_seconds: config.access_token_ttl_seconds(),
            refresh_ttl_seconds: config.refresh_token_ttl_seconds(),
            reset_ttl_seconds: config.reset_token_ttl_seconds(),
        }
    }

    /// Sign a new access token.
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if signing fails.
    pub fn generate_jwt(&self, input: &AccessTokenInput) -> AuthResult<String> {
        self.generate_access_with_ttl(input, self.access_ttl_seconds)
    }

    fn generate_access_with_ttl(
        &self,
        input: &AccessTokenInput,
        ttl_seconds: i64,
    ) -> AuthResult<String> {
        let iat = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: input.user_id,
            email: input.email.clone(),
            role: input.role,
            workspace_id: input.workspace_id,
            iat,
            exp: iat + ttl_seconds,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| AuthError::internal("token.sign", &err.into()))
    }

    /// Verify an access token: signature, issuer, audience, and expiry.
    ///
    /// # Errors
    /// Returns `EXPIRED_JWT` (with an `expired_at` detail) past expiry and
    /// `INVALID_JWT` for any other failure, including a refresh or reset
    /// token presented where an access token is expected.
    pub fn verify_jwt(&self, token: &str) -> AuthResult<AccessClaims> {
        match decode::<AccessClaims>(token, &self.decoding_key, &self.validation()) {
            Ok(data) => {
                // A forged access payload carrying a token_type discriminant
                // must not pass as an access token.
                if self.decode_jwt(token).is_some_and(|c| c.token_type.is_some()) {
                    return Err(AuthError::new(
                        AuthErrorCode::InvalidJwt,
                        "the token is not an access token",
                    ));
                }
                Ok(data.claims)
            }
            Err(err) => Err(self.access_error(token, &err)),
        }
    }

    /// Sign a refresh token for `user_id`.
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if signing fails.
    pub fn generate_refresh_token(&self, user_id: Uuid) -> AuthResult<String> {
        let iat = Utc::now().timestamp();
        let claims = RefreshClaims {
            sub: user_id,
            token_type: TOKEN_TYPE_REFRESH.to_string(),
            iat,
            exp: iat + self.refresh_ttl_seconds,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| AuthError::internal("token.sign_refresh", &err.into()))
    }

    /// Verify a refresh token.
    ///
    /// # Errors
    /// Returns `INVALID_REFRESH_TOKEN` on any verification failure or when
    /// the `token_type` discriminant is not `"refresh"`.
    pub fn verify_refresh_token(&self, token: &str) -> AuthResult<RefreshClaims> {
        let claims = decode::<RefreshClaims>(token, &self.decoding_key, &self.validation())
            .map(|data| data.claims)
            .map_err(|_| {
                AuthError::new(
                    AuthErrorCode::InvalidRefreshToken,
                    "the refresh token is not valid",
                )
            })?;
        if claims.token_type != TOKEN_TYPE_REFRESH {
            return Err(AuthError::new(
                AuthErrorCode::InvalidRefreshToken,
                "the refresh token is not valid",
            ));
        }
        Ok(claims)
    }

    /// Sign a password-reset token.
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if signing fails.
    pub fn generate_password_reset_token(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> AuthResult<String> {
        let iat = Utc::now().timestamp();
        let claims = ResetClaims {
            sub: user_id,
            email: email.to_string(),
            token_type: TOKEN_TYPE_PASSWORD_RESET.to_string(),
            iat,
            exp: iat + self.reset_ttl_seconds,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| AuthError::internal("token.sign_reset", &err.into()))
    }

    /// Verify a password-reset token.
    ///
    /// # Errors
    /// Returns `INVALID_RESET_TOKEN` on any verification failure or when the
    /// `token_type` discriminant is not `"password-reset"`.
    pub fn verify_password_reset_token(&self, token: &str) -> AuthResult<ResetClaims> {
        let claims = decode::<ResetClaims>(token, &self.decoding_key, &self.validation())
            .map(|data| data.claims)
            .map_err(|_| {
                AuthError::new(
                    AuthErrorCode::InvalidResetToken,
                    "the password reset token is not valid",
                )
            })?;
        if claims.token_type != TOKEN_TYPE_PASSWORD_RESET {
            return Err(AuthError::new(
                AuthErrorCode::InvalidResetToken,
                "the password reset token is not valid",
            ));
        }
        Ok(claims)
    }

    /// Decode claims without verifying the signature.
    ///
    /// Returns `None` for anything that does not parse as a JWT.
    #[must_use]
    pub fn decode_jwt(&self, token: &str) -> Option<UnverifiedClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        decode::<UnverifiedClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .ok()
    }

    /// Whether the token is past its expiry, from an unverified decode.
    ///
    /// Unreadable tokens are treated as expired.
    #[must_use]
    pub fn is_token_expired(&self, token: &str) -> bool {
        match self.decode_jwt(token).and_then(|claims| claims.exp) {
            Some(exp) => exp <= Utc::now().timestamp(),
            None => true,
        }
    }

    /// Seconds until expiry, from an unverified decode.
    ///
    /// Returns zero for expired or unreadable tokens, never a negative value.
    #[must_use]
    pub fn token_time_remaining(&self, token: &str) -> std::time::Duration {
        let remaining = self
            .decode_jwt(token)
            .and_then(|claims| claims.exp)
            .map_or(0, |exp| exp - Utc::now().timestamp());
        std::time::Duration::from_secs(remaining.max(0) as u64)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.leeway = 0;
        validation
    }

    fn access_error(&self, token: &str, err: &jsonwebtoken::errors::Error) -> AuthError {
        if matches!(err.kind(), ErrorKind::ExpiredSignature) {
            let mut auth_err =
                AuthError::new(AuthErrorCode::ExpiredJwt, "the token has expired");
            if let Some(expired_at) = self
                .decode_jwt(token)
                .and_then(|claims| claims.exp)
                .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0))
            {
                auth_err =
                    auth_err.with_details(json!({ "expired_at": expired_at.to_rfc3339() }));
            }
            return auth_err;
        }
        AuthError::new(AuthErrorCode::InvalidJwt, "the token is not valid")
    }
}
