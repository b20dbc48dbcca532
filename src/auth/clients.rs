//! Client records and credential checking.
//!
//! Secrets are stored as `sha256$<salt hex>$<digest hex>` where the digest is
//! SHA-256 over salt followed by secret. Comparison is constant-time.
//!
//! [`ClientAuthenticator::authenticate`] does the same amount of work for an
//! unknown client, a tenant mismatch and a wrong secret, and returns the same
//! [`AuthError::InvalidCredentials`] for all three.

use std::sync::Arc;

use dashmap::DashMap;
use rsa::rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const HASH_SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;

/// A tenant-owned client identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Client identifier, unique across tenants.
    pub client_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Salted secret digest, see [`hash_secret`].
    #[serde(skip_serializing)]
    pub secret_hash: String,
}

/// Credentials presented at login.
#[derive(Clone, Deserialize)]
pub struct ClientCredentials {
    /// Claimed client id.
    pub client_id: String,
    /// Plaintext secret.
    pub secret: String,
    /// Optional tenant scope; must match the client's tenant when present.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// Credential check failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Unknown client, wrong tenant or wrong secret; deliberately not distinguished.
    #[error("invalid client credentials")]
    InvalidCredentials,
}

/// Persistence for client records.
#[async_trait::async_trait]
pub trait ClientStore: Send + Sync + 'static {
    /// Look up a client by id.
    async fn get(&self, client_id: &str) -> Option<Client>;

    /// Insert or replace a client. Returns `true` when the record is new.
    async fn upsert(&self, client: Client) -> bool;
}

/// In-memory client store.
#[derive(Debug, Default)]
pub struct InMemoryClientStore {
    clients: DashMap<String, Client>,
}

impl InMemoryClientStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait::async_trait]
impl ClientStore for InMemoryClientStore {
    async fn get(&self, client_id: &str) -> Option<Client> {
        self.clients.get(client_id).map(|c| c.clone())
    }

    async fn upsert(&self, client: Client) -> bool {
        self.clients.insert(client.client_id.clone(), client).is_none()
    }
}

/// Hash a secret with a fresh random salt.
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    format!(
        "{HASH_SCHEME}${}${}",
        hex::encode(salt),
        hex::encode(digest(&salt, secret))
    )
}

/// Check `secret` against a stored hash. Malformed hashes never match.
#[must_use]
pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let Some((salt, expected)) = parse_hash(stored) else {
        return false;
    };
    let actual = digest(&salt, secret);
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

fn digest(salt: &[u8], secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().as_slice().to_vec()
}

fn parse_hash(stored: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut parts = stored.split('$');
    if parts.next()? != HASH_SCHEME {
        return None;
    }
    let salt = hex::decode(parts.next()?).ok()?;
    let expected = hex::decode(parts.next()?).ok()?;
    if parts.next().is_some() || salt.is_empty() || expected.len() != 32 {
        return None;
    }
    Some((salt, expected))
}

/// Validates client credentials against the [`ClientStore`].
pub struct ClientAuthenticator {
    store: Arc<dyn ClientStore>,
    /// Compared against when there is no real record, to keep work uniform.
    dummy_hash: String,
}

impl ClientAuthenticator {
    /// Create an authenticator over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ClientStore>) -> Self {
        let mut filler = [0u8; 32];
        OsRng.fill_bytes(&mut filler);
        Self {
            store,
            dummy_hash: hash_secret(&hex::encode(filler)),
        }
    }

    /// Resolve the client for `credentials` or fail with
    /// [`AuthError::InvalidCredentials`].
    pub async fn authenticate(&self, credentials: &ClientCredentials) -> Result<Client, AuthError> {
        let candidate = self
            .store
            .get(&credentials.client_id)
            .await
            .filter(|c| {
                credentials
                    .tenant_id
                    .as_deref()
                    .is_none_or(|tenant| tenant == c.tenant_id)
            });

        let stored = candidate
            .as_ref()
            .map_or(self.dummy_hash.as_str(), |c| c.secret_hash.as_str());
        let secret_ok = verify_secret(&credentials.secret, stored);

        match candidate {
            Some(client) if secret_ok => Ok(client),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ClientStore> {
        &self.store
    }
}
