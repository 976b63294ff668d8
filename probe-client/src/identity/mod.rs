//! Identity service abstraction.
//!
//! The identity service sits on top of a graph store: it owns user accounts
//! and the authenticated session, and announces session changes as
//! [`AuthEvent`]s. Only its interface matters to the harness; the bundled
//! [`MemoryIdentity`] is a self-contained stand-in.

mod memory;

pub use memory::{HashParams, MemoryIdentity};

use crate::store::GraphStore;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

/// Identity errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No user is logged in.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Result of a sign-up or login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthOutcome {
    /// Whether the attempt succeeded.
    pub success: bool,
    /// The authenticated username on success.
    pub username: Option<String>,
    /// Reason for failure.
    pub error: Option<String>,
}

impl AuthOutcome {
    /// A successful attempt.
    pub fn ok(username: &str) -> Self {
        Self {
            success: true,
            username: Some(username.to_string()),
            error: None,
        }
    }

    /// A failed attempt.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            username: None,
            error: Some(error.into()),
        }
    }
}

/// The authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentUser {
    /// Username the account was created with.
    pub alias: String,
    /// Public key, hex encoded.
    pub pub_key: String,
}

/// Session change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A user logged in (also emitted by a successful sign-up).
    Login {
        /// Username
        alias: String,
        /// Public key, hex encoded
        pub_key: String,
    },
    /// The current user logged out.
    Logout {
        /// Username
        alias: String,
    },
}

impl AuthEvent {
    /// Name of the login event.
    pub const LOGIN: &'static str = "auth:login";
    /// Name of the logout event.
    pub const LOGOUT: &'static str = "auth:logout";

    /// The event's name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => Self::LOGIN,
            Self::Logout { .. } => Self::LOGOUT,
        }
    }
}

/// An identity/auth service layered over a graph store.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// The underlying store type.
    type Store: GraphStore;

    /// Create an account and log it in.
    async fn sign_up(&self, username: &str, password: &str) -> AuthOutcome;

    /// Log in to an existing account.
    async fn login(&self, username: &str, password: &str) -> AuthOutcome;

    /// End the current session.
    async fn logout(&self) -> Result<(), IdentityError>;

    /// The logged-in user, if any.
    fn current_user(&self) -> Option<CurrentUser>;

    /// Public key of the logged-in user (`user.is.pub`).
    fn is_pub(&self) -> Option<String> {
        self.current_user().map(|user| user.pub_key)
    }

    /// Receive session events emitted after this call.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// The store this service writes through.
    fn store(&self) -> &Self::Store;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names() {
        let login = AuthEvent::Login {
            alias: "a".into(),
            pub_key: "k".into(),
        };
        assert_eq!(login.name(), "auth:login");
        assert_eq!(AuthEvent::Logout { alias: "a".into() }.name(), "auth:logout");
    }

    #[test]
    fn outcome_constructors() {
        assert_eq!(
            AuthOutcome::ok("alice"),
            AuthOutcome {
                success: true,
                username: Some("alice".into()),
                error: None,
            }
        );
        let failed = AuthOutcome::failed("nope");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("nope"));
    }
}
