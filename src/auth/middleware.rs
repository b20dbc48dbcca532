//! Authorization gates.
//!
//! Two gates sit in front of protected handlers:
//!
//! - **ClientGate** ([`client_gate`], [`require_client`]): client credentials
//!   from `Authorization: Basic` or a JSON body `{client_id, secret,
//!   tenant_id?}`. On success the resolved [`Client`] is placed in the request
//!   extensions.
//! - **TokenGate** ([`token_gate`], [`require_token`]): `Authorization: Bearer
//!   <token>`. On success an [`AuthorizedSession`] is placed in the request
//!   extensions.
//!
//! Every failure produces the same 401 body. The specific reason is written
//! to the audit log only.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use governor::clock::{Clock as RateClock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::AuthState;
use super::audit::{self, AuditEvent};
use super::clients::{Client, ClientAuthenticator, ClientCredentials};
use super::session::Session;
use super::token::{Claims, TokenService, VerifiedToken};

/// Largest credential body the client gate will buffer.
pub const MAX_CREDENTIAL_BODY: usize = 64 * 1024;

/// How often the login throttle drops idle client ids.
pub const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Gate failure, rendered as an HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Any credential or token failure.
    Unauthorized,
    /// Login throttle tripped for the claimed client id.
    RateLimited,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(json!({
                    "error": "unauthorized",
                    "message": "Authentication required"
                })),
            )
                .into_response(),
            Self::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, "60")],
                Json(json!({
                    "error": "rate_limited",
                    "message": "Too many login attempts. Try again later."
                })),
            )
                .into_response(),
        }
    }
}

/// A verified bearer token and its live session.
#[derive(Debug, Clone)]
pub struct AuthorizedSession {
    /// Session as read during verification.
    pub session: Session,
    /// Verified claims.
    pub claims: Claims,
}

/// Per-client_id login throttle.
///
/// Keys are whatever client id a caller claims, known or not, so state is
/// created for made-up ids too. [`spawn_limiter_sweeper`] drops entries whose
/// quota has fully replenished.
pub struct LoginLimiter<C: RateClock = DefaultClock> {
    limiter: RateLimiter<String, DefaultKeyedStateStore<String>, C, NoOpMiddleware<C::Instant>>,
}

impl LoginLimiter {
    /// Limiter allowing `per_minute` attempts per client id; `None` when 0.
    #[must_use]
    pub fn new(per_minute: u32) -> Option<Self> {
        Self::with_clock(per_minute, DefaultClock::default())
    }
}

impl<C: RateClock> LoginLimiter<C> {
    /// Same as [`LoginLimiter::new`] on an explicit clock.
    #[must_use]
    pub fn with_clock(per_minute: u32, clock: C) -> Option<Self> {
        NonZeroU32::new(per_minute).map(|quota| Self {
            limiter: RateLimiter::new(
                Quota::per_minute(quota),
                DefaultKeyedStateStore::default(),
                clock,
            ),
        })
    }

    /// Consume one attempt for `client_id`.
    #[must_use]
    pub fn check(&self, client_id: &str) -> bool {
        self.limiter.check_key(&client_id.to_string()).is_ok()
    }

    /// Number of client ids currently holding throttle state.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }

    /// Drop client ids whose quota has fully replenished. Returns how many
    /// were dropped.
    pub fn sweep(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        before.saturating_sub(self.limiter.len())
    }
}

/// Spawn a task that sweeps `limiter` every `interval` until `shutdown`
/// turns true or its sender is dropped.
pub fn spawn_limiter_sweeper<C>(
    limiter: Arc<LoginLimiter<C>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    C: RateClock + Send + Sync + 'static,
    C::Instant: Send + Sync,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = limiter.sweep();
                    if swept > 0 {
                        debug!(count = swept, remaining = limiter.tracked(), "Swept idle login throttle entries");
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => {
                    debug!("Login throttle sweeper shutting down");
                    break;
                }
            }
        }
    })
}

/// Decide the client gate for `credentials`.
pub async fn client_gate(
    authenticator: &ClientAuthenticator,
    credentials: &ClientCredentials,
) -> Result<Client, Rejection> {
    match authenticator.authenticate(credentials).await {
        Ok(client) => {
            audit::emit(&AuditEvent::login_succeeded(
                &client.client_id,
                &client.tenant_id,
            ));
            Ok(client)
        }
        Err(_) => {
            audit::emit(&AuditEvent::login_denied(
                Some(&credentials.client_id),
                "invalid_credentials",
            ));
            Err(Rejection::Unauthorized)
        }
    }
}

/// Decide the token gate for a request's headers.
pub async fn token_gate(
    tokens: &TokenService,
    headers: &HeaderMap,
) -> Result<AuthorizedSession, Rejection> {
    let Some(token) = bearer_token(headers) else {
        audit::emit(&AuditEvent::rejected("missing_bearer"));
        return Err(Rejection::Unauthorized);
    };

    let verified = check_token(tokens, token).await?;
    Ok(AuthorizedSession {
        session: verified.session,
        claims: verified.claims,
    })
}

/// Verify a raw token string, auditing the reason on failure.
pub async fn check_token(tokens: &TokenService, token: &str) -> Result<VerifiedToken, Rejection> {
    match tokens.verify(token).await {
        Ok(verified) => Ok(verified),
        Err(e) => {
            if !e.is_rejection() {
                warn!(error = %e, "Token verification failed unexpectedly");
            }
            audit::emit(&AuditEvent::rejected(e.reason()));
            Err(Rejection::Unauthorized)
        }
    }
}

/// Extract a bearer token from `Authorization`.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extract `client_id:secret` from `Authorization: Basic`.
#[must_use]
pub fn basic_credentials(headers: &HeaderMap) -> Option<ClientCredentials> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Basic ")
                .or_else(|| v.strip_prefix("basic "))
        })?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (client_id, secret) = decoded.split_once(':')?;
    Some(ClientCredentials {
        client_id: client_id.to_string(),
        secret: secret.to_string(),
        tenant_id: None,
    })
}

/// ClientGate as axum middleware.
///
/// The body is buffered to read credentials and handed on unchanged.
pub async fn require_client(
    State(state): State<Arc<AuthState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let Ok(bytes) = axum::body::to_bytes(body, MAX_CREDENTIAL_BODY).await else {
        audit::emit(&AuditEvent::login_denied(None, "unreadable_body"));
        return Rejection::Unauthorized.into_response();
    };

    let credentials = basic_credentials(&parts.headers)
        .or_else(|| serde_json::from_slice::<ClientCredentials>(&bytes).ok());
    let Some(credentials) = credentials else {
        audit::emit(&AuditEvent::login_denied(None, "missing_credentials"));
        return Rejection::Unauthorized.into_response();
    };

    if let Some(limiter) = &state.login_limiter
        && !limiter.check(&credentials.client_id)
    {
        warn!(client_id = %credentials.client_id, "Login rate limit exceeded");
        audit::emit(&AuditEvent::login_denied(
            Some(&credentials.client_id),
            "rate_limited",
        ));
        return Rejection::RateLimited.into_response();
    }

    match client_gate(&state.authenticator, &credentials).await {
        Ok(client) => {
            debug!(client_id = %client.client_id, path = %parts.uri.path(), "Client authenticated");
            let mut request = Request::from_parts(parts, Body::from(bytes));
            request.extensions_mut().insert(client);
            next.run(request).await
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// TokenGate as axum middleware.
pub async fn require_token(
    State(state): State<Arc<AuthState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match token_gate(&state.tokens, request.headers()).await {
        Ok(authorized) => {
            debug!(
                client_id = %authorized.claims.sub,
                session_id = %authorized.session.session_id,
                path = %request.uri().path(),
                "Token accepted"
            );
            request.extensions_mut().insert(authorized);
            next.run(request).await
        }
        Err(rejection) => rejection.into_response(),
    }
}
