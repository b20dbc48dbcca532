//! Session store: one row per issued token.
//!
//! Sessions are created on login, flipped to `revoked` on logout and never
//! removed, so the table doubles as an audit trail. Expiry needs no state
//! change: an expired session simply fails the time check forever after.
//!
//! The [`SessionStore`] trait is the seam for durable backends. The bundled
//! [`InMemorySessionStore`] keeps rows in a `DashMap`; every operation holds
//! the shard lock for its key only, which gives per-row atomicity without a
//! global lock and makes a committed revoke visible to every later read.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;

/// Server-side record behind a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// UUID v4.
    pub session_id: String,
    /// Client the session was issued to.
    pub client_id: String,
    /// Creation time, whole seconds.
    pub issued_at: DateTime<Utc>,
    /// Expiry, whole seconds.
    pub expires_at: DateTime<Utc>,
    /// Set on logout; never cleared.
    pub revoked: bool,
}

impl Session {
    /// Whether `now` is at or past the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Session store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session with that id.
    #[error("session not found: {0}")]
    NotFound(String),

    /// TTL does not fit the timestamp range.
    #[error("session ttl out of range: {0:?}")]
    InvalidTtl(Duration),
}

/// Storage for sessions.
///
/// Implementations must make each call atomic per `session_id`.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Create an active session for `client_id` living for `ttl`.
    async fn create(&self, client_id: &str, ttl: Duration) -> Result<Session, SessionError>;

    /// Fetch a session.
    async fn get(&self, session_id: &str) -> Result<Session, SessionError>;

    /// Mark a session revoked. Revoking twice succeeds.
    async fn revoke(&self, session_id: &str) -> Result<(), SessionError>;

    /// All sessions ever issued to `client_id`, oldest first.
    async fn list_for_client(&self, client_id: &str) -> Vec<Session>;
}

/// In-memory session store.
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionStore {
    /// Create an empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
        }
    }

    /// Number of stored sessions, revoked and expired included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, client_id: &str, ttl: Duration) -> Result<Session, SessionError> {
        let issued_at = self.clock.now().trunc_subsecs(0);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .ok_or(SessionError::InvalidTtl(ttl))?
            .trunc_subsecs(0);

        let session = Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            issued_at,
            expires_at,
            revoked: false,
        };
        self.sessions
            .insert(session.session_id.clone(), session.clone());

        debug!(session_id = %session.session_id, client_id = %client_id, "Session created");
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Session, SessionError> {
        self.sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    async fn revoke(&self, session_id: &str) -> Result<(), SessionError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if !entry.revoked {
            entry.revoked = true;
            debug!(session_id = %session_id, "Session revoked");
        }
        Ok(())
    }

    async fn list_for_client(&self, client_id: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|e| e.value().client_id == client_id)
            .map(|e| e.value().clone())
            .collect();
        sessions.sort_by_key(|s| s.issued_at);
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (InMemorySessionStore, Arc<ManualClock>) {
        let clock = ManualClock::new();
        (InMemorySessionStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn create_sets_window_and_active_state() {
        // GIVEN: a store on a frozen clock
        let (store, clock) = store();

        // WHEN: creating a 10 minute session
        let session = store.create("c1", Duration::from_secs(600)).await.unwrap();

        // THEN: it is active and spans exactly the ttl
        assert!(!session.revoked);
        assert_eq!(session.issued_at, clock.now());
        assert_eq!(
            session.expires_at - session.issued_at,
            chrono::Duration::seconds(600)
        );
        assert_eq!(store.get(&session.session_id).await.unwrap(), session);
    }

    #[tokio::test]
    async fn session_ids_are_unique() {
        let (store, _) = store();

        let a = store.create("c1", Duration::from_secs(60)).await.unwrap();
        let b = store.create("c1", Duration::from_secs(60)).await.unwrap();

        assert_ne!(a.session_id, b.session_id);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let (store, _) = store();

        let err = store.get("missing").await.unwrap_err();

        assert_eq!(err, SessionError::NotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_sticky() {
        let (store, _) = store();
        let session = store.create("c1", Duration::from_secs(60)).await.unwrap();

        store.revoke(&session.session_id).await.unwrap();
        store.revoke(&session.session_id).await.unwrap();

        let after = store.get(&session.session_id).await.unwrap();
        assert!(after.revoked);
        // Row is kept for audit
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn revoke_unknown_is_not_found() {
        let (store, _) = store();

        assert!(matches!(
            store.revoke("missing").await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn expiry_is_a_time_check_only() {
        let (store, clock) = store();
        let session = store.create("c1", Duration::from_secs(60)).await.unwrap();

        assert!(!session.is_expired_at(clock.now()));
        clock.advance(chrono::Duration::seconds(59));
        assert!(!session.is_expired_at(clock.now()));
        clock.advance(chrono::Duration::seconds(1));
        assert!(session.is_expired_at(clock.now()));

        // Still not revoked
        assert!(!store.get(&session.session_id).await.unwrap().revoked);
    }

    #[tokio::test]
    async fn list_for_client_filters_and_orders() {
        let (store, clock) = store();
        let first = store.create("c1", Duration::from_secs(60)).await.unwrap();
        clock.advance(chrono::Duration::seconds(5));
        let second = store.create("c1", Duration::from_secs(60)).await.unwrap();
        store.create("c2", Duration::from_secs(60)).await.unwrap();

        let listed = store.list_for_client("c1").await;

        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].session_id, first.session_id);
        assert_eq!(listed[1].session_id, second.session_id);
    }

    #[tokio::test]
    async fn absurd_ttl_is_rejected() {
        let (store, _) = store();

        let err = store.create("c1", Duration::MAX).await.unwrap_err();

        assert!(matches!(err, SessionError::InvalidTtl(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_revoke_and_get_agree() {
        let (store, _) = store();
        let store = Arc::new(store);
        let session = store.create("c1", Duration::from_secs(60)).await.unwrap();

        let revoker = {
            let store = Arc::clone(&store);
            let id = session.session_id.clone();
            tokio::spawn(async move { store.revoke(&id).await })
        };
        revoker.await.unwrap().unwrap();

        let mut readers = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let id = session.session_id.clone();
            readers.push(tokio::spawn(async move { store.get(&id).await }));
        }
        for reader in readers {
            assert!(reader.await.unwrap().unwrap().revoked);
        }
    }
}
