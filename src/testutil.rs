//! Shared fixtures for unit tests.

use std::sync::{Arc, LazyLock};

use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::rand_core::OsRng;

use crate::auth::clients::{Client, InMemoryClientStore, hash_secret};
use crate::auth::session::InMemorySessionStore;
use crate::auth::token::TokenService;
use crate::clock::ManualClock;
use crate::keys::KeyManager;

static PRIVATE_PEM: LazyLock<String> = LazyLock::new(|| {
    let key = RsaPrivateKey::new(&mut OsRng, 2048).expect("generate test key");
    key.to_pkcs8_pem(LineEnding::LF).expect("encode test key").to_string()
});

static KEYS: LazyLock<Arc<KeyManager>> = LazyLock::new(|| {
    Arc::new(KeyManager::from_pkcs8_pem(&PRIVATE_PEM).expect("load test key"))
});

/// PKCS#8 PEM of the per-binary test key.
pub(crate) fn private_pem() -> &'static str {
    &PRIVATE_PEM
}

/// Key manager over the per-binary test key.
pub(crate) fn key_manager() -> Arc<KeyManager> {
    Arc::clone(&KEYS)
}

pub(crate) fn client(client_id: &str, tenant_id: &str, secret: &str) -> Client {
    Client {
        client_id: client_id.to_string(),
        tenant_id: tenant_id.to_string(),
        secret_hash: hash_secret(secret),
    }
}

pub(crate) async fn client_store(clients: &[Client]) -> Arc<InMemoryClientStore> {
    use crate::auth::clients::ClientStore;

    let store = Arc::new(InMemoryClientStore::new());
    for c in clients {
        store.upsert(c.clone()).await;
    }
    store
}

/// Token service on a manual clock with a 15 minute TTL.
pub(crate) fn token_service() -> (TokenService, Arc<ManualClock>) {
    let clock = ManualClock::new();
    let sessions = Arc::new(InMemorySessionStore::new(clock.clone()));
    let service = TokenService::new(
        key_manager(),
        sessions,
        clock.clone(),
        std::time::Duration::from_secs(15 * 60),
        "auth-kernel-test",
    );
    (service, clock)
}
