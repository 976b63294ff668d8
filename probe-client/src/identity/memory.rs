//! In-memory identity service.
//!
//! Accounts live in process memory. Passwords are stretched with Argon2id
//! under a random per-account salt; the public key is a SHA-256 digest of the
//! username and stretched password.

use super::{AuthEvent, AuthOutcome, CurrentUser, IdentityError, IdentityService};
use crate::store::GraphStore;
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

const SALT_SIZE: usize = 16;
const DIGEST_SIZE: usize = 32;
const EVENT_CAPACITY: usize = 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    memory_kib: u32,
    iterations: u32,
}

impl HashParams {
    /// Create parameters. Argon2 requires at least 8 KiB.
    pub fn new(memory_kib: u32, iterations: u32) -> Self {
        Self {
            memory_kib,
            iterations,
        }
    }

    /// Cheapest valid parameters, for tests.
    pub fn fast() -> Self {
        Self::new(8, 1)
    }

    fn hasher(self) -> Result<Argon2<'static>, IdentityError> {
        let params = Params::new(self.memory_kib, self.iterations, 1, Some(DIGEST_SIZE))
            .map_err(|e| IdentityError::Hashing(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for HashParams {
    /// 19 MiB, 2 iterations.
    fn default() -> Self {
        Self::new(19 * 1024, 2)
    }
}

struct Account {
    salt: [u8; SALT_SIZE],
    digest: [u8; DIGEST_SIZE],
    pub_key: String,
}

/// Identity service keeping accounts in memory.
pub struct MemoryIdentity<S: GraphStore> {
    store: S,
    params: HashParams,
    accounts: DashMap<String, Account>,
    session: Mutex<Option<CurrentUser>>,
    events: broadcast::Sender<AuthEvent>,
}

impl<S: GraphStore> std::fmt::Debug for MemoryIdentity<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIdentity")
            .field("params", &self.params)
            .field("accounts", &self.accounts.len())
            .field("current_user", &self.current_user())
            .finish_non_exhaustive()
    }
}

impl<S: GraphStore> MemoryIdentity<S> {
    /// Create an identity service over `store` with default hash cost.
    pub fn new(store: S) -> Self {
        Self::with_params(store, HashParams::default())
    }

    /// Create an identity service with explicit hash cost.
    pub fn with_params(store: S, params: HashParams) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            params,
            accounts: DashMap::new(),
            session: Mutex::new(None),
            events,
        }
    }

    /// Stretch a password on the blocking pool.
    async fn stretch(
        &self,
        password: &str,
        salt: [u8; SALT_SIZE],
    ) -> Result<[u8; DIGEST_SIZE], IdentityError> {
        let hasher = self.params.hasher()?;
        let password = password.to_owned();

        tokio::task::spawn_blocking(move || {
            let mut digest = [0u8; DIGEST_SIZE];
            hasher
                .hash_password_into(password.as_bytes(), &salt, &mut digest)
                .map_err(|e| IdentityError::Hashing(e.to_string()))?;
            Ok(digest)
        })
        .await
        .map_err(|e| IdentityError::Hashing(e.to_string()))?
    }

    fn start_session(&self, alias: &str, pub_key: &str) {
        let user = CurrentUser {
            alias: alias.to_string(),
            pub_key: pub_key.to_string(),
        };
        if let Ok(mut session) = self.session.lock() {
            *session = Some(user);
        }
        // No receivers is fine.
        let _ = self.events.send(AuthEvent::Login {
            alias: alias.to_string(),
            pub_key: pub_key.to_string(),
        });
        tracing::info!("User {} logged in", alias);
    }
}

fn derive_pub_key(alias: &str, digest: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"relayprobe-identity-v1");
    hasher.update(alias.as_bytes());
    hasher.update(digest);
    hex::encode(hasher.finalize())
}

#[async_trait]
impl<S: GraphStore> IdentityService for MemoryIdentity<S> {
    type Store = S;

    async fn sign_up(&self, username: &str, password: &str) -> AuthOutcome {
        if username.is_empty() || password.is_empty() {
            return AuthOutcome::failed("Username and password are required");
        }
        if self.accounts.contains_key(username) {
            return AuthOutcome::failed("User already exists");
        }

        let mut salt = [0u8; SALT_SIZE];
        if let Err(e) = getrandom::getrandom(&mut salt) {
            return AuthOutcome::failed(format!("salt generation failed: {e}"));
        }
        let digest = match self.stretch(password, salt).await {
            Ok(digest) => digest,
            Err(e) => return AuthOutcome::failed(e.to_string()),
        };
        let pub_key = derive_pub_key(username, &digest);

        // Another sign-up may have raced us between the check and the hash.
        match self.accounts.entry(username.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return AuthOutcome::failed("User already exists");
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Account {
                    salt,
                    digest,
                    pub_key: pub_key.clone(),
                });
            }
        }

        tracing::debug!("Created account {}", username);
        self.start_session(username, &pub_key);
        AuthOutcome::ok(username)
    }

    async fn login(&self, username: &str, password: &str) -> AuthOutcome {
        let (salt, expected, pub_key) = match self.accounts.get(username) {
            Some(account) => (account.salt, account.digest, account.pub_key.clone()),
            None => return AuthOutcome::failed("Wrong user or password."),
        };

        match self.stretch(password, salt).await {
            Ok(digest) if digest == expected => {
                self.start_session(username, &pub_key);
                AuthOutcome::ok(username)
            }
            Ok(_) => AuthOutcome::failed("Wrong user or password."),
            Err(e) => AuthOutcome::failed(e.to_string()),
        }
    }

    async fn logout(&self) -> Result<(), IdentityError> {
        let previous = self
            .session
            .lock()
            .map_err(|_| IdentityError::NotAuthenticated)?
            .take();

        match previous {
            Some(user) => {
                let _ = self.events.send(AuthEvent::Logout {
                    alias: user.alias.clone(),
                });
                tracing::info!("User {} logged out", user.alias);
                Ok(())
            }
            None => Err(IdentityError::NotAuthenticated),
        }
    }

    fn current_user(&self) -> Option<CurrentUser> {
        self.session.lock().ok().and_then(|session| session.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn store(&self) -> &S {
        &self.store
    }
}
