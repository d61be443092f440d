//! Append-only audit log of authentication events plus threshold-based
//! anomaly detection.
//!
//! Logging is a best-effort side channel: a store failure is reported
//! through `tracing` and swallowed, so auditing can never break the primary
//! authentication flow. The detector reads the same log back, which makes
//! "locked" an emergent property of accumulated events rather than a flag on
//! the user record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::AnomalyThresholds;
use crate::error::{AuthError, AuthResult};
use crate::store::EventStore;

const DETECTION_WINDOW_HOURS: i64 = 24;

/// Kind of audit event. The string form is the persisted representation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    Login,
    Logout,
    MfaSetup,
    PasswordReset,
    AccountLocked,
    SuspiciousActivity,
}

impl AuthEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::MfaSetup => "MFA_SETUP",
            Self::PasswordReset => "PASSWORD_RESET",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
        }
    }
}

/// One audit log entry. Never mutated after append; `user_id` is `None` only
/// for signals that could not be attributed (e.g. an unknown email).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub user_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
}

/// Event counts by kind over a reporting window.
#[derive(Clone, Debug, Serialize)]
pub struct SecurityStats {
    pub window_days: u32,
    pub total: u64,
    pub by_kind: HashMap<AuthEventKind, u64>,
}

/// Writes audit events and evaluates the suspicious-activity heuristics.
#[derive(Clone)]
pub struct EventLogger {
    store: Arc<dyn EventStore>,
    thresholds: AnomalyThresholds,
}

impl EventLogger {
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, thresholds: AnomalyThresholds) -> Self {
        Self { store, thresholds }
    }

    /// Append an event. Infallible by contract: store failures are logged
    /// locally and swallowed.
    pub async fn log_event(&self, event: AuthEvent) {
        let kind = event.kind;
        if let Err(err) = self.store.append(event).await {
            error!(kind = kind.as_str(), error = %err, "failed to append auth event");
        }
    }

    /// Convenience wrapper building the event with the current timestamp.
    pub async fn log(
        &self,
        kind: AuthEventKind,
        user_id: Option<Uuid>,
        ip: Option<&str>,
        user_agent: Option<&str>,
        metadata: serde_json::Value,
    ) {
        self.log_event(AuthEvent {
            kind,
            user_id,
            timestamp: Utc::now(),
            ip: ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            metadata,
        })
        .await;
    }

    /// Run the three heuristics over the user's last 24 hours of events.
    ///
    /// Any single hit flags the user, emits a SUSPICIOUS_ACTIVITY event, and
    /// returns `true`. A store read failure disables detection for this call
    /// rather than failing the caller.
    pub async fn detect_suspicious_activity(&self, user_id: Uuid, ip: Option<&str>) -> bool {
        let since = Utc::now() - Duration::hours(DETECTION_WINDOW_HOURS);
        let events = match self.store.for_user_since(user_id, since).await {
            Ok(events) => events,
            Err(err) => {
                warn!(%user_id, error = %err, "anomaly detection skipped: event store unavailable");
                return false;
            }
        };

        let logins: Vec<&AuthEvent> = events
            .iter()
            .filter(|event| event.kind == AuthEventKind::Login)
            .collect();

        let mut reasons = Vec::new();
        if distinct_ip_count(&logins) > self.thresholds.max_login_ips {
            reasons.push("multiple-ips");
        }
        if logins.len() > self.thresholds.max_logins {
            reasons.push("excessive-logins");
        }
        let login_hours: Vec<u32> = logins
            .iter()
            .map(|event| event.timestamp.with_timezone(&Local).hour())
            .collect();
        let current_hour = Utc::now().with_timezone(&Local).hour();
        if excessive_night_logins(&login_hours, current_hour, self.thresholds.max_night_logins) {
            reasons.push("night-logins");
        }

        if reasons.is_empty() {
            return false;
        }

        self.log(
            AuthEventKind::SuspiciousActivity,
            Some(user_id),
            ip,
            None,
            json!({ "reasons": reasons }),
        )
        .await;
        true
    }

    /// Aggregate event counts by kind over the last `days` days, optionally
    /// restricted to one user.
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if the event store fails.
    pub async fn security_stats(
        &self,
        user_id: Option<Uuid>,
        days: u32,
    ) -> AuthResult<SecurityStats> {
        let since = Utc::now() - Duration::days(i64::from(days));
        let events = self
            .store
            .since(since, user_id)
            .await
            .map_err(|err| AuthError::internal("events.since", &err))?;

        let mut by_kind: HashMap<AuthEventKind, u64> = HashMap::new();
        for event in &events {
            *by_kind.entry(event.kind).or_default() += 1;
        }
        Ok(SecurityStats {
            window_days: days,
            total: events.len() as u64,
            by_kind,
        })
    }

    /// Delete events older than `days_to_keep` days; returns the removed
    /// count. Retention clamping is the calling job's responsibility.
    ///
    /// # Errors
    /// Returns `AUTHENTICATION_ERROR` if the event store fails.
    pub async fn cleanup_old_logs(&self, days_to_keep: u32) -> AuthResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days_to_keep));
        self.store
            .purge_before(cutoff)
            .await
            .map_err(|err| AuthError::internal("events.purge_before", &err))
    }
}

fn distinct_ip_count(logins: &[&AuthEvent]) -> usize {
    let mut ips: Vec<&str> = logins
        .iter()
        .filter_map(|event| event.ip.as_deref())
        .collect();
    ips.sort_unstable();
    ips.dedup();
    ips.len()
}

// The night window is local hours [0, 6) plus anything past 23.
fn is_night_hour(hour: u32) -> bool {
    hour < 6 || hour > 23
}

/// Night logins only count while the current hour itself is in the night
/// window; daytime traffic is never flagged retroactively.
fn excessive_night_logins(login_hours: &[u32], current_hour: u32, max_night_logins: usize) -> bool {
    is_night_hour(current_hour)
        && login_hours.iter().copied().filter(|hour| is_night_hour(*hour)).count()
            > max_night_logins
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryEventStore;
    use anyhow::Result;
    use async_trait::async_trait;

    // The night heuristic reads the host's wall clock; tests that must not
    // flag disable it so they are deterministic at any hour.
    fn thresholds_without_night() -> AnomalyThresholds {
        AnomalyThresholds {
            max_night_logins: usize::MAX,
            ..AnomalyThresholds::default()
        }
    }

    fn logger(store: Arc<MemoryEventStore>) -> EventLogger {
        EventLogger::new(store, thresholds_without_night())
    }

    fn login_event(user_id: Uuid, ip: &str) -> AuthEvent {
        AuthEvent {
            kind: AuthEventKind::Login,
            user_id: Some(user_id),
            timestamp: Utc::now(),
            ip: Some(ip.to_string()),
            user_agent: None,
            metadata: json!({ "success": false }),
        }
    }

    #[test]
    fn night_window_covers_early_hours_only() {
        for hour in 0..6 {
            assert!(is_night_hour(hour), "hour {hour} should be night");
        }
        for hour in 6..=23 {
            assert!(!is_night_hour(hour), "hour {hour} should be day");
        }
    }

    #[test]
    fn night_logins_require_current_hour_in_window() {
        let hours = [1, 2, 3];
        assert!(excessive_night_logins(&hours, 2, 2));
        // Same history evaluated at noon never flags.
        assert!(!excessive_night_logins(&hours, 12, 2));
        // At most the threshold is fine.
        assert!(!excessive_night_logins(&[1, 2], 2, 2));
    }

    #[test]
    fn distinct_ips_are_deduplicated() {
        let user = Uuid::new_v4();
        let events = vec![
            login_event(user, "10.0.0.1"),
            login_event(user, "10.0.0.1"),
            login_event(user, "10.0.0.2"),
        ];
        let refs: Vec<&AuthEvent> = events.iter().collect();
        assert_eq!(distinct_ip_count(&refs), 2);
    }

    #[tokio::test]
    async fn four_distinct_ips_flag_the_user() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store.clone());
        let user = Uuid::new_v4();

        for n in 1..=4 {
            logger
                .log_event(login_event(user, &format!("10.0.0.{n}")))
                .await;
        }

        assert!(logger.detect_suspicious_activity(user, Some("10.0.0.5")).await);
        // The detector records its own finding.
        let suspicious = store
            .since(Utc::now() - Duration::hours(1), Some(user))
            .await
            .unwrap()
            .into_iter()
            .filter(|event| event.kind == AuthEventKind::SuspiciousActivity)
            .count();
        assert_eq!(suspicious, 1);
    }

    #[tokio::test]
    async fn three_ips_stay_below_the_threshold() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store);
        let user = Uuid::new_v4();

        for n in 1..=3 {
            logger
                .log_event(login_event(user, &format!("10.0.0.{n}")))
                .await;
        }
        assert!(!logger.detect_suspicious_activity(user, None).await);
    }

    #[tokio::test]
    async fn more_than_ten_logins_flag_the_user() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store);
        let user = Uuid::new_v4();

        for _ in 0..11 {
            logger.log_event(login_event(user, "10.0.0.1")).await;
        }
        assert!(logger.detect_suspicious_activity(user, None).await);
    }

    #[tokio::test]
    async fn other_users_events_are_not_counted() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store);
        let noisy = Uuid::new_v4();
        let quiet = Uuid::new_v4();

        for n in 1..=6 {
            logger
                .log_event(login_event(noisy, &format!("10.0.0.{n}")))
                .await;
        }
        assert!(!logger.detect_suspicious_activity(quiet, None).await);
    }

    #[tokio::test]
    async fn stats_aggregate_by_kind() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store);
        let user = Uuid::new_v4();

        logger.log_event(login_event(user, "10.0.0.1")).await;
        logger.log_event(login_event(user, "10.0.0.2")).await;
        logger
            .log(AuthEventKind::Logout, Some(user), None, None, json!({}))
            .await;

        let stats = logger.security_stats(Some(user), 7).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_kind.get(&AuthEventKind::Login), Some(&2));
        assert_eq!(stats.by_kind.get(&AuthEventKind::Logout), Some(&1));
    }

    #[tokio::test]
    async fn cleanup_reports_the_removed_count() {
        let store = Arc::new(MemoryEventStore::new());
        let logger = logger(store.clone());
        let user = Uuid::new_v4();

        store
            .append(AuthEvent {
                kind: AuthEventKind::Login,
                user_id: Some(user),
                timestamp: Utc::now() - Duration::days(90),
                ip: None,
                user_agent: None,
                metadata: json!({}),
            })
            .await
            .unwrap();
        logger.log_event(login_event(user, "10.0.0.1")).await;

        let removed = logger.cleanup_old_logs(30).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }

    struct FailingEventStore;

    #[async_trait]
    impl crate::store::EventStore for FailingEventStore {
        async fn append(&self, _event: AuthEvent) -> Result<()> {
            anyhow::bail!("event store down")
        }

        async fn for_user_since(
            &self,
            _user_id: Uuid,
            _since: DateTime<Utc>,
        ) -> Result<Vec<AuthEvent>> {
            anyhow::bail!("event store down")
        }

        async fn since(
            &self,
            _since: DateTime<Utc>,
            _user_id: Option<Uuid>,
        ) -> Result<Vec<AuthEvent>> {
            anyhow::bail!("event store down")
        }

        async fn purge_before(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
            anyhow::bail!("event store down")
        }
    }

    #[tokio::test]
    async fn logging_failures_are_swallowed() {
        let logger = EventLogger::new(Arc::new(FailingEventStore), AnomalyThresholds::default());
        // Must not panic or error.
        logger.log_event(login_event(Uuid::new_v4(), "10.0.0.1")).await;
        // Detection fails open to "not suspicious" when the log is unreadable.
        assert!(!logger.detect_suspicious_activity(Uuid::new_v4(), None).await);
    }
}
