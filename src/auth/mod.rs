//! Client authentication, session tokens and the gates in front of
//! protected endpoints.
//!
//! # Flow
//!
//! ```text
//! POST /auth/login (client credentials)
//!   -> ClientGate: ClientAuthenticator::authenticate
//!   -> TokenService::issue_token  (session row + RS256 token)
//!
//! any protected request (Authorization: Bearer <token>)
//!   -> TokenGate: signature -> expiry -> session exists -> not revoked
//!   -> handler sees AuthorizedSession
//!
//! GET /auth/logout
//!   -> TokenGate -> SessionStore::revoke  (every later use of the token fails)
//! ```
//!
//! Token verification needs only the public key and one session lookup; the
//! signing key is loaded once at startup and shared read-only.

pub mod audit;
pub mod clients;
pub mod handler;
pub mod middleware;
pub mod session;
pub mod token;

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::keys::KeyManager;

pub use audit::AuditEvent;
pub use clients::{
    AuthError, Client, ClientAuthenticator, ClientCredentials, ClientStore, InMemoryClientStore,
};
pub use middleware::{AuthorizedSession, LoginLimiter, Rejection};
pub use session::{InMemorySessionStore, Session, SessionError, SessionStore};
pub use token::{Claims, IssuedToken, TokenError, TokenService, VerifiedToken};

/// Shared state behind every `/auth` route.
pub struct AuthState {
    /// Credential checks for the client gate
    pub authenticator: ClientAuthenticator,
    /// Token issuance and verification
    pub tokens: TokenService,
    /// Active signing key, for JWKS
    pub keys: Arc<KeyManager>,
    /// Login throttle (`None` when disabled)
    pub login_limiter: Option<Arc<LoginLimiter>>,
}

impl AuthState {
    /// Assemble the auth subsystem from its collaborators.
    #[must_use]
    pub fn new(
        config: &Config,
        keys: Arc<KeyManager>,
        clients: Arc<dyn ClientStore>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            authenticator: ClientAuthenticator::new(clients),
            tokens: TokenService::new(
                Arc::clone(&keys),
                sessions,
                clock,
                config.tokens.ttl,
                config.tokens.issuer.clone(),
            ),
            keys,
            login_limiter: LoginLimiter::new(config.login.rate_limit_per_minute).map(Arc::new),
        }
    }

    /// Client store behind the authenticator.
    #[must_use]
    pub fn clients(&self) -> &Arc<dyn ClientStore> {
        self.authenticator.store()
    }
}
