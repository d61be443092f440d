//! End-to-end scenarios across the assembled auth core.
//!
//! Everything runs against the in-memory collaborators; the harness wires
//! the services exactly the way a composition root would.

use std::sync::Arc;

use coedit_auth::cache::memory::{FailingCacheStore, MemoryCacheStore};
use coedit_auth::cache::{CacheStore, SessionCache};
use coedit_auth::store::memory::{
    MemoryEventStore, MemoryMembershipStore, MemoryResourceStore, MemoryUserStore,
};
use coedit_auth::store::{MembershipStore, ResourceRecord, UserStore, WorkspaceMember};
use coedit_auth::{
    AnomalyThresholds, AuthConfig, AuthErrorCode, AuthService, Credentials, EventLogger,
    MfaService, NewUser, PermissionService, Provider, PublicUser, Role, TokenService,
};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

struct Harness {
    auth: AuthService,
    users: Arc<MemoryUserStore>,
    membership: Arc<MemoryMembershipStore>,
    resources: Arc<MemoryResourceStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_cache(Arc::new(MemoryCacheStore::new()))
    }

    /// Same wiring with a caller-chosen cache store, for degraded-cache runs.
    fn with_cache(cache_store: Arc<dyn CacheStore>) -> Self {
        // MIN_COST keeps the suite fast; production uses the default cost 12.
        // The night-login heuristic reads the host's wall clock, so it is
        // disabled here to keep the lockout scenarios deterministic.
        let config = AuthConfig::new("integration-test-secret")
            .with_bcrypt_cost(4)
            .with_anomaly_thresholds(AnomalyThresholds {
                max_night_logins: usize::MAX,
                ..AnomalyThresholds::default()
            });
        let users = Arc::new(MemoryUserStore::new());
        let membership = Arc::new(MemoryMembershipStore::new());
        let resources = Arc::new(MemoryResourceStore::new());
        let events = EventLogger::new(
            Arc::new(MemoryEventStore::new()),
            config.anomaly_thresholds(),
        );
        let cache = SessionCache::new(cache_store, &config);
        let tokens = TokenService::new(&config);
        let mfa = MfaService::new(users.clone(), &config);
        let permissions = Arc::new(PermissionService::new(
            users.clone(),
            membership.clone(),
            resources.clone(),
        ));
        let auth = AuthService::new(
            users.clone(),
            cache,
            tokens,
            mfa,
            events,
            permissions,
            &config,
        );
        Self {
            auth,
            users,
            membership,
            resources,
        }
    }

    async fn signup(&self, email: &str) -> PublicUser {
        self.auth
            .create_user(NewUser {
                email: email.to_string(),
                name: "Integration".to_string(),
                password: Some("password123".to_string()),
                provider: Provider::Email,
                provider_id: None,
                image: None,
            })
            .await
            .expect("signup failed")
    }
}

fn credentials(email: &str, password: &str, ip: &str) -> Credentials {
    Credentials {
        email: email.to_string(),
        password: password.to_string(),
        mfa_token: None,
        workspace_id: None,
        ip: Some(ip.to_string()),
        user_agent: Some("integration-tests".to_string()),
    }
}

fn totp_token(secret_base32: &str) -> String {
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        2,
        30,
        Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .expect("secret decodes"),
        None,
        "integration".to_string(),
    )
    .expect("totp builds");
    totp.generate_current().expect("token generates")
}

#[tokio::test]
async fn new_user_is_persisted_with_a_hash_and_mfa_disabled() {
    let harness = Harness::new();
    let public = harness.signup("a@b.com").await;

    let stored = harness
        .users
        .find_by_id(public.id)
        .await
        .unwrap()
        .expect("user persisted");
    assert!(!stored.mfa_enabled);
    let hash = stored.password_hash.expect("hash persisted");
    assert!(hash.starts_with("$2"));
    assert!(!hash.contains("password123"));
}

#[tokio::test]
async fn password_login_yields_a_verifiable_token_pair() {
    let harness = Harness::new();
    harness.signup("a@b.com").await;

    let success = harness
        .auth
        .authenticate(credentials("a@b.com", "password123", "10.0.0.1"))
        .await
        .expect("login succeeds");

    let claims = harness.auth.verify_jwt(&success.token).await.unwrap();
    assert_eq!(claims.sub, success.user.id);
    assert_eq!(claims.email, "a@b.com");
    assert_eq!(claims.iss, "collaborative-editor");

    // The second verification is served from the JWT cache and agrees.
    let cached = harness.auth.verify_jwt(&success.token).await.unwrap();
    assert_eq!(cached, claims);

    let refresh = harness
        .auth
        .tokens()
        .verify_refresh_token(&success.refresh_token)
        .unwrap();
    assert_eq!(refresh.sub, success.user.id);
}

#[tokio::test]
async fn mfa_lifecycle_gates_the_login() {
    let harness = Harness::new();
    let public = harness.signup("a@b.com").await;

    let setup = harness.auth.setup_mfa(public.id).await.unwrap();
    harness
        .auth
        .enable_mfa(public.id, &totp_token(&setup.secret))
        .await
        .unwrap();

    // Without a token the login is refused with MFA_REQUIRED...
    let err = harness
        .auth
        .authenticate(credentials("a@b.com", "password123", "10.0.0.1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), AuthErrorCode::MfaRequired);

    // ...with a wrong token it is INVALID_MFA_TOKEN...
    let mut wrong = credentials("a@b.com", "password123", "10.0.0.1");
    wrong.mfa_token = Some("000000".to_string());
    let err = harness.auth.authenticate(wrong).await.unwrap_err();
    assert_eq!(err.code(), AuthErrorCode::InvalidMfaToken);

    // ...and with a current TOTP it succeeds.
    let mut good = credentials("a@b.com", "password123", "10.0.0.1");
    good.mfa_token = Some(totp_token(&setup.secret));
    harness.auth.authenticate(good).await.expect("mfa login");
}

#[tokio::test]
async fn backup_codes_login_once_each() {
    let harness = Harness::new();
    let public = harness.signup("a@b.com").await;
    let setup = harness.auth.setup_mfa(public.id).await.unwrap();
    harness
        .auth
        .enable_mfa(public.id, &totp_token(&setup.secret))
        .await
        .unwrap();
    let backup = setup.backup_codes[0].clone();

    let mut with_backup = credentials("a@b.com", "password123", "10.0.0.1");
    with_backup.mfa_token = Some(backup.clone());
    harness
        .auth
        .authenticate(with_backup)
        .await
        .expect("backup code login");

    // The code was consumed; a replay is rejected.
    let mut replay = credentials("a@b.com", "password123", "10.0.0.1");
    replay.mfa_token = Some(backup);
    let err = harness.auth.authenticate(replay).await.unwrap_err();
    assert_eq!(err.code(), AuthErrorCode::InvalidMfaToken);

    // Sibling codes are unaffected.
    let mut sibling = credentials("a@b.com", "password123", "10.0.0.1");
    sibling.mfa_token = Some(setup.backup_codes[1].clone());
    harness
        .auth
        .authenticate(sibling)
        .await
        .expect("sibling code login");
}

#[tokio::test]
async fn failed_attempts_from_many_ips_lock_the_account() {
    let harness = Harness::new();
    harness.signup("a@b.com").await;

    // Four failed passwords from four distinct addresses...
    for n in 1..=4 {
        let err = harness
            .auth
            .authenticate(credentials(
                "a@b.com",
                "wrong-password",
                &format!("203.0.113.{n}"),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::InvalidPassword);
    }

    // ...lock the fifth attempt even with the correct password.
    let err = harness
        .auth
        .authenticate(credentials("a@b.com", "password123", "203.0.113.99"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), AuthErrorCode::AccountLocked);
}

#[tokio::test]
async fn three_failed_attempts_do_not_lock() {
    let harness = Harness::new();
    harness.signup("a@b.com").await;

    for n in 1..=3 {
        let _ = harness
            .auth
            .authenticate(credentials(
                "a@b.com",
                "wrong-password",
                &format!("203.0.113.{n}"),
            ))
            .await;
    }

    harness
        .auth
        .authenticate(credentials("a@b.com", "password123", "203.0.113.4"))
        .await
        .expect("below the threshold the account stays open");
}

#[tokio::test]
async fn editors_update_documents_viewers_do_not() {
    let harness = Harness::new();
    let viewer = harness.signup("viewer@b.com").await;
    let editor = harness.signup("editor@b.com").await;
    let workspace_id = Uuid::new_v4();

    for (user, role) in [(&viewer, Role::Viewer), (&editor, Role::Editor)] {
        harness
            .membership
            .upsert(WorkspaceMember {
                user_id: user.id,
                workspace_id,
                role,
            })
            .await
            .unwrap();
    }

    assert!(!harness
        .auth
        .check_permission(viewer.id, workspace_id, "document", "update", None)
        .await
        .unwrap());
    assert!(harness
        .auth
        .check_permission(editor.id, workspace_id, "document", "update", None)
        .await
        .unwrap());
}

#[tokio::test]
async fn public_pages_are_readable_without_membership() {
    let harness = Harness::new();
    let stranger = harness.signup("stranger@b.com").await;
    let workspace_id = Uuid::new_v4();

    let page = ResourceRecord {
        id: Uuid::new_v4(),
        workspace_id,
        created_by: Uuid::new_v4(),
        is_public: true,
    };
    harness.resources.insert_page(page);

    assert!(harness
        .auth
        .permissions()
        .check_page_permission(stranger.id, page.id, "read")
        .await
        .unwrap());
    assert!(!harness
        .auth
        .permissions()
        .check_page_permission(stranger.id, page.id, "update")
        .await
        .unwrap());
}

#[tokio::test]
async fn authentication_survives_a_dead_cache() {
    let harness = Harness::with_cache(Arc::new(FailingCacheStore));
    harness.signup("a@b.com").await;

    let success = harness
        .auth
        .authenticate(credentials("a@b.com", "password123", "10.0.0.1"))
        .await
        .expect("cache failures must degrade to misses");

    // Token verification also works without the JWT cache.
    let claims = harness.auth.verify_jwt(&success.token).await.unwrap();
    assert_eq!(claims.sub, success.user.id);

    // The session cache is gone, so there is simply no session to read.
    assert!(harness.auth.get_session(success.user.id).await.is_none());
}

#[tokio::test]
async fn sessions_are_written_read_and_dropped_on_logout() {
    let harness = Harness::new();
    harness.signup("a@b.com").await;
    let success = harness
        .auth
        .authenticate(credentials("a@b.com", "password123", "10.0.0.1"))
        .await
        .unwrap();

    let session = harness
        .auth
        .require_session(success.user.id)
        .await
        .expect("session exists after login");
    assert_eq!(session.user.id, success.user.id);

    harness.auth.logout(success.user.id).await;
    let err = harness
        .auth
        .require_session(success.user.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), AuthErrorCode::SessionExpired);
}
