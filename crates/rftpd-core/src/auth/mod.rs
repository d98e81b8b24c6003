//! Contains the [`AuthBackend`] trait and the [`UserDetail`] identity it hands back.
//!
//! The control-channel dispatcher never reaches into a credential store itself; it drives the
//! USER/PASS/ACCT dance purely through this trait. An embedding application implements
//! `AuthBackend` once (e.g. against PAM, a JSON file, an HTTP endpoint) and hands an `Arc<dyn
//! AuthBackend<User>>` to the engine.
//!
//! ```no_run
//! use rftpd_core::auth::{AuthBackend, AuthenticationError, UserDetail};
//! use async_trait::async_trait;
//!
//! #[derive(Debug, Clone)]
//! struct AnonymousUser;
//!
//! impl UserDetail for AnonymousUser {
//!     fn account_required(&self) -> bool {
//!         false
//!     }
//! }
//!
//! impl std::fmt::Display for AnonymousUser {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "anonymous")
//!     }
//! }
//!
//! #[derive(Debug)]
//! struct AllowAnonymous;
//!
//! #[async_trait]
//! impl AuthBackend<AnonymousUser> for AllowAnonymous {
//!     async fn check_user(&self, username: &str) -> bool {
//!         username == "anonymous"
//!     }
//!
//!     async fn check_pass(&self, username: &str, _password: &str) -> Result<AnonymousUser, AuthenticationError> {
//!         if username == "anonymous" {
//!             Ok(AnonymousUser)
//!         } else {
//!             Err(AuthenticationError::BadCredentials)
//!         }
//!     }
//!
//!     async fn check_acct(&self, _user: &AnonymousUser, _account: &str) -> Result<(), AuthenticationError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use derive_more::Display;
use std::fmt::Debug;
use thiserror::Error;

/// The identity handed back by a successful [`AuthBackend::check_pass`].
///
/// Implementations typically wrap a username plus whatever else the embedding application
/// needs to carry through the session (home directory, quota, permissions, ...).
pub trait UserDetail: Debug + Display + Send + Sync {
    /// Whether this user must additionally supply an `ACCT` before being admitted. Most
    /// backends return `false`; account-gated backends override this.
    fn account_required(&self) -> bool {
        false
    }
}

/// A trivial [`UserDetail`] for backends (and tests) that carry no identity beyond a name.
#[derive(Debug, Clone, Display, PartialEq, Eq)]
pub struct DefaultUser(pub String);

impl UserDetail for DefaultUser {}

/// The narrowed authentication collaborator the dispatcher calls into during the USER/PASS/ACCT
/// sequence (§6 `AuthBackend`).
#[async_trait]
pub trait AuthBackend<User>: Debug + Send + Sync
where
    User: UserDetail,
{
    /// Returns whether `username` is known to this backend. Used to decide whether `USER`
    /// should reply `331` (need password) without leaking which exact usernames exist beyond
    /// what the backend is willing to disclose.
    async fn check_user(&self, username: &str) -> bool;

    /// Verifies `password` for `username` and returns the resulting identity, or an
    /// [`AuthenticationError`] that the dispatcher maps to `530`.
    async fn check_pass(&self, username: &str, password: &str) -> Result<User, AuthenticationError>;

    /// Verifies an `ACCT` argument for an already-authenticated `user`.
    async fn check_acct(&self, user: &User, account: &str) -> Result<(), AuthenticationError>;
}

/// Failure modes of [`AuthBackend`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The username/password pair was rejected.
    #[error("bad credentials")]
    BadCredentials,
    /// The account string supplied via `ACCT` was rejected.
    #[error("bad account")]
    BadAccount,
    /// The backend itself failed (I/O, network, ...) independent of the supplied credentials.
    #[error("authentication backend error: {0}")]
    BackendError(String),
}
