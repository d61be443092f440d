//! Service configuration loaded once at startup and shared by reference.

use secrecy::SecretString;

const DEFAULT_JWT_ISSUER: &str = "collaborative-editor";
const DEFAULT_JWT_AUDIENCE: &str = "collaborative-editor-users";
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 90 * 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_SESSION_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;
const DEFAULT_USER_CACHE_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_JWT_CACHE_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_TOTP_ISSUER: &str = "Collaborative Editor";
const DEFAULT_TOTP_SKEW: u8 = 2;
const DEFAULT_TOTP_STEP: u64 = 30;
const DEFAULT_BACKUP_CODE_COUNT: usize = 8;

/// Anomaly-detection thresholds.
///
/// The defaults are part of the behavioral contract of the detector; tune
/// them only with a matching change to the operational runbook.
#[derive(Clone, Copy, Debug)]
pub struct AnomalyThresholds {
    /// Flag when a user logged in from more than this many distinct IPs
    /// within the detection window.
    pub max_login_ips: usize,
    /// Flag when a user produced more than this many login events within the
    /// detection window.
    pub max_logins: usize,
    /// Flag when more than this many logins fell into the night window,
    /// evaluated only while the current local hour is also in that window.
    pub max_night_logins: usize,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            max_login_ips: 3,
            max_logins: 10,
            max_night_logins: 2,
        }
    }
}

/// Configuration for the auth core.
///
/// Constructed once at process start and handed to the services by the
/// composition root; there is no global state to reach for.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    jwt_issuer: String,
    jwt_audience: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    bcrypt_cost: u32,
    session_ttl_seconds: u64,
    user_cache_ttl_seconds: u64,
    jwt_cache_ttl_seconds: u64,
    totp_issuer: String,
    totp_skew: u8,
    totp_step: u64,
    backup_code_count: usize,
    anomaly_thresholds: AnomalyThresholds,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: SecretString::from(jwt_secret.into()),
            jwt_issuer: DEFAULT_JWT_ISSUER.to_string(),
            jwt_audience: DEFAULT_JWT_AUDIENCE.to_string(),
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            user_cache_ttl_seconds: DEFAULT_USER_CACHE_TTL_SECONDS,
            jwt_cache_ttl_seconds: DEFAULT_JWT_CACHE_TTL_SECONDS,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
            totp_skew: DEFAULT_TOTP_SKEW,
            totp_step: DEFAULT_TOTP_STEP,
            backup_code_count: DEFAULT_BACKUP_CODE_COUNT,
            anomaly_thresholds: AnomalyThresholds::default(),
        }
    }

    #[must_use]
    pub fn with_jwt_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.jwt_issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_jwt_audience(mut self, audience: impl Into<String>) -> Self {
        self.jwt_audience = audience.into();
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_user_cache_ttl_seconds(mut self, seconds: u64) -> Self {
        self.user_cache_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_jwt_cache_ttl_seconds(mut self, seconds: u64) -> Self {
        self.jwt_cache_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.totp_issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_totp_skew(mut self, skew: u8) -> Self {
        self.totp_skew = skew;
        self
    }

    #[must_use]
    pub fn with_backup_code_count(mut self, count: usize) -> Self {
        self.backup_code_count = count;
        self
    }

    #[must_use]
    pub fn with_anomaly_thresholds(mut self, thresholds: AnomalyThresholds) -> Self {
        self.anomaly_thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    #[must_use]
    pub fn jwt_issuer(&self) -> &str {
        &self.jwt_issuer
    }

    #[must_use]
    pub fn jwt_audience(&self) -> &str {
        &self.jwt_audience
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    #[must_use]
    pub fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn user_cache_ttl_seconds(&self) -> u64 {
        self.user_cache_ttl_seconds
    }

    #[must_use]
    pub fn jwt_cache_ttl_seconds(&self) -> u64 {
        self.jwt_cache_ttl_seconds
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    #[must_use]
    pub fn totp_skew(&self) -> u8 {
        self.totp_skew
    }

    #[must_use]
    pub fn totp_step(&self) -> u64 {
        self.totp_step
    }

    #[must_use]
    pub fn backup_code_count(&self) -> usize {
        self.backup_code_count
    }

    #[must_use]
    pub fn anomaly_thresholds(&self) -> AnomalyThresholds {
        self.anomaly_thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::{AnomalyThresholds, AuthConfig};

    #[test]
    fn defaults_match_contract() {
        let config = AuthConfig::new("test-secret");
        assert_eq!(config.jwt_issuer(), "collaborative-editor");
        assert_eq!(config.jwt_audience(), "collaborative-editor-users");
        assert_eq!(config.access_token_ttl_seconds(), 30 * 24 * 60 * 60);
        assert_eq!(config.refresh_token_ttl_seconds(), 90 * 24 * 60 * 60);
        assert_eq!(config.reset_token_ttl_seconds(), 60 * 60);
        assert_eq!(config.bcrypt_cost(), 12);
        assert_eq!(config.session_ttl_seconds(), 30 * 24 * 60 * 60);
        assert_eq!(config.user_cache_ttl_seconds(), 15 * 60);
        assert_eq!(config.jwt_cache_ttl_seconds(), 60 * 60);
        assert_eq!(config.totp_skew(), 2);
        assert_eq!(config.totp_step(), 30);
        assert_eq!(config.backup_code_count(), 8);
    }

    #[test]
    fn anomaly_defaults_are_preserved() {
        let thresholds = AnomalyThresholds::default();
        assert_eq!(thresholds.max_login_ips, 3);
        assert_eq!(thresholds.max_logins, 10);
        assert_eq!(thresholds.max_night_logins, 2);
    }

    #[test]
    fn builders_override_defaults() {
        let config = AuthConfig::new("test-secret")
            .with_bcrypt_cost(4)
            .with_totp_skew(1)
            .with_access_token_ttl_seconds(60);
        assert_eq!(config.bcrypt_cost(), 4);
        assert_eq!(config.totp_skew(), 1);
        assert_eq!(config.access_token_ttl_seconds(), 60);
    }
}
