//! # Coedit Auth (Authentication & Session-Security Core)
//!
//! `coedit-auth` is the authentication core of the Coedit collaborative
//! editor. It implements credential verification, the JWT/refresh/reset
//! token lifecycle, TOTP-based multi-factor authentication with one-time
//! backup codes, best-effort session/user/JWT caching, an append-only audit
//! log with threshold anomaly detection, and the workspace role/permission
//! engine.
//!
//! ## Architecture
//!
//! The crate is a library consumed by an HTTP layer it knows nothing about:
//! no status codes or headers appear anywhere in its surface. Persistence
//! and caching are ports ([`store::UserStore`], [`store::MembershipStore`],
//! [`store::ResourceStore`], [`store::EventStore`], [`cache::CacheStore`])
//! that the composition root implements against its database and Redis;
//! in-memory implementations ship for tests and single-node use.
//!
//! - **Explicit dependency injection:** services are constructed once at
//!   process start and handed to [`auth::AuthService`]; there are no global
//!   singletons to stub around in tests.
//! - **Best-effort side channels:** cache failures degrade to misses and
//!   audit-log failures are swallowed, so neither can break a login.
//! - **Tagged errors:** every failure is an [`error::AuthError`] carrying a
//!   stable [`error::AuthErrorCode`]; messages stay generic and collaborator
//!   error text never reaches a caller.
//!
//! ## Sessions & Lockout
//!
//! Sessions are idempotent cache entries keyed by user id, slid forward on
//! every read. Account lockout is emergent: failed attempts accumulate in
//! the audit log and the anomaly detector flags the account on the next
//! attempt once a heuristic threshold is crossed.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod mfa;
pub mod permissions;
pub mod store;
pub mod token;

pub use auth::{AuthService, AuthSuccess, Credentials, NewUser, OAuthProfile, PublicUser};
pub use cache::SessionCache;
pub use config::{AnomalyThresholds, AuthConfig};
pub use error::{AuthError, AuthErrorCode, AuthResult};
pub use events::{AuthEvent, AuthEventKind, EventLogger};
pub use mfa::{MfaService, MfaSetup};
pub use permissions::{has_minimum_role, AccessContext, PermissionService, Role};
pub use store::Provider;
pub use token::{AccessClaims, AccessTokenInput, TokenService};
