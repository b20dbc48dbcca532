//! Access token issuance and verification.
//!
//! # Token format
//!
//! Compact JWS, RS256:
//!
//! ```text
//! base64url({"typ":"JWT","alg":"RS256","kid":..})
//!   . base64url({"iss":..,"sub":client_id,"tid":tenant_id,"sid":session_id,"iat":..,"exp":..})
//!   . base64url(RSASSA-PKCS1-v1_5-SHA256(signing input))
//! ```
//!
//! Any JOSE library holding the public key from [`KeyManager::public_jwk`]
//! can check the signature. The token itself is never stored; only the
//! session it references is.
//!
//! Encoding, signing and signature checks are done by `jsonwebtoken` through
//! [`KeyManager::sign_jwt`] and [`KeyManager::decode_jwt`]. Expiry is checked
//! here against the injected [`Clock`] rather than by the library.
//!
//! # Verification order
//!
//! parse → signature → expiry → session lookup → revoked flag. The claims
//! segment is not decoded until the signature over it has been checked, so a
//! modified payload always surfaces as [`TokenError::SignatureInvalid`].

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::audit::{self, AuditEvent};
use super::clients::Client;
use super::session::{Session, SessionError, SessionStore};
use crate::clock::Clock;
use crate::keys::{KeyError, KeyManager};

/// Signed token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer.
    pub iss: String,
    /// Subject: the client id.
    pub sub: String,
    /// Tenant of the client.
    pub tid: String,
    /// Referenced session.
    pub sid: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// Token verification and issuance failures.
///
/// The HTTP boundary collapses all verification variants into one 401.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Not a well-formed RS256 compact JWS.
    #[error("malformed token")]
    Malformed,

    /// Signature does not verify against the active key.
    #[error("token signature invalid")]
    SignatureInvalid,

    /// `now >= exp`.
    #[error("token expired")]
    Expired,

    /// Session was revoked by logout.
    #[error("session revoked")]
    Revoked,

    /// Referenced session does not exist.
    #[error("session not found")]
    SessionNotFound,

    /// Session row could not be created.
    #[error("session could not be created: {0}")]
    SessionCreate(#[source] SessionError),

    /// Signing the token failed.
    #[error("token signing failed: {0}")]
    Signing(#[from] KeyError),
}

impl TokenError {
    /// Short machine-readable reason for audit records.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::SignatureInvalid => "signature_invalid",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::SessionNotFound => "session_not_found",
            Self::SessionCreate(_) => "session_create_failed",
            Self::Signing(_) => "signing_failed",
        }
    }

    /// Whether the failure is a property of the presented token (as opposed
    /// to a server-side fault).
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Malformed
                | Self::SignatureInvalid
                | Self::Expired
                | Self::Revoked
                | Self::SessionNotFound
        )
    }
}

/// A freshly issued token and the session behind it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact token string handed to the client.
    pub token: String,
    /// Session row created for it.
    pub session: Session,
    /// Signed claims.
    pub claims: Claims,
}

impl IssuedToken {
    /// Lifetime in seconds.
    #[must_use]
    pub fn expires_in(&self) -> u64 {
        u64::try_from(self.claims.exp - self.claims.iat).unwrap_or(0)
    }
}

/// Result of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// Verified claims.
    pub claims: Claims,
    /// Live session.
    pub session: Session,
}

/// Issues and verifies access tokens.
pub struct TokenService {
    keys: Arc<KeyManager>,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    issuer: String,
    validation: Validation,
}

impl TokenService {
    /// Create a token service.
    pub fn new(
        keys: Arc<KeyManager>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        issuer: impl Into<String>,
    ) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.set_issuer(&[&issuer]);

        Self {
            keys,
            sessions,
            clock,
            ttl,
            issuer,
            validation,
        }
    }

    /// Configured token lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Configured issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Session store backing this service.
    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Create a session for `client` and sign a token referencing it.
    pub async fn issue_token(&self, client: &Client) -> Result<IssuedToken, TokenError> {
        let session = self
            .sessions
            .create(&client.client_id, self.ttl)
            .await
            .map_err(TokenError::SessionCreate)?;

        let claims = Claims {
            iss: self.issuer.clone(),
            sub: client.client_id.clone(),
            tid: client.tenant_id.clone(),
            sid: session.session_id.clone(),
            iat: session.issued_at.timestamp(),
            exp: session.expires_at.timestamp(),
        };

        let token = match self.keys.sign_jwt(&claims) {
            Ok(token) => token,
            Err(e) => {
                // No usable session may outlive a failed issuance
                self.discard_session(&session.session_id).await;
                return Err(e.into());
            }
        };

        audit::emit(&AuditEvent::issued(&claims));
        Ok(IssuedToken {
            token,
            session,
            claims,
        })
    }

    /// Verify `token` and return the live session it references.
    pub async fn verify_token(&self, token: &str) -> Result<Session, TokenError> {
        self.verify(token).await.map(|v| v.session)
    }

    /// Verify `token`, returning both claims and session.
    ///
    /// Performs no writes.
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        if token.split('.').count() != 3 {
            return Err(TokenError::Malformed);
        }

        let claims = self
            .keys
            .decode_jwt::<Claims>(token, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
                _ => TokenError::Malformed,
            })?
            .claims;

        if self.clock.now().timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        let session = self
            .sessions
            .get(&claims.sid)
            .await
            .map_err(|_| TokenError::SessionNotFound)?;
        if session.client_id != claims.sub {
            return Err(TokenError::SessionNotFound);
        }
        if session.revoked {
            return Err(TokenError::Revoked);
        }

        Ok(VerifiedToken { claims, session })
    }

    /// Revoke a session. Revoking an already revoked session succeeds.
    pub async fn revoke_session(&self, session_id: &str) -> Result<(), SessionError> {
        self.sessions.revoke(session_id).await
    }

    /// Rotate a verified session: issue a fresh token for `client`, then
    /// revoke the presented session.
    pub async fn refresh(
        &self,
        current: &VerifiedToken,
        client: &Client,
    ) -> Result<IssuedToken, TokenError> {
        if current.claims.sub != client.client_id {
            return Err(TokenError::SessionNotFound);
        }

        let issued = self.issue_token(client).await?;
        self.sessions
            .revoke(&current.session.session_id)
            .await
            .map_err(|_| TokenError::SessionNotFound)?;

        audit::emit(&AuditEvent::refreshed(
            &current.session.session_id,
            &issued.claims,
        ));
        Ok(issued)
    }

    /// Revoke a session whose token was never handed out. Failures are logged.
    async fn discard_session(&self, session_id: &str) -> bool {
        match self.sessions.revoke(session_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id, error = %e, "Failed to revoke session after signing failure");
                false
            }
        }
    }
}
