//! HTTP handlers for the auth endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Gate | Description |
//! |--------|------|------|-------------|
//! | `GET` | `/healthz` | none | Liveness |
//! | `GET` | `/auth/jwks` | none | Public signing key as a JWK set |
//! | `POST` | `/auth/token` | none | `client_credentials` and `refresh_token` grants |
//! | `POST` | `/auth/login` | client | Issue a token for the authenticated client |
//! | `POST` | `/auth/authorize` | token | Confirm the token and describe its session |
//! | `GET` | `/auth/logout` | token | Revoke the session behind the token |
//! | `GET` | `/auth/session` | token | Full session record |
//! | `POST` | `/auth/client` | token | Create or replace a client in the caller's tenant |
//!
//! ## Token grants
//!
//! ```json
//! {"grant_type": "client_credentials", "client_id": "c1", "client_secret": "s1"}
//! {"grant_type": "refresh_token", "refresh_token": "<current access token>"}
//! ```
//!
//! A refresh rotates the session: the presented token stops working once the
//! new one has been issued.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use super::{
    AuthState,
    audit::{self, AuditEvent},
    clients::{Client, ClientCredentials, hash_secret},
    middleware::{AuthorizedSession, Rejection, check_token, client_gate, require_client, require_token},
    token::{IssuedToken, TokenError},
};

// ── Request / Response types ───────────────────────────────────────────────

/// Token response for login and both grants.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed access token.
    pub access_token: String,
    /// Always `"Bearer"`.
    pub token_type: String,
    /// Seconds until expiry.
    pub expires_in: u64,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
    /// Session backing the token.
    pub session_id: String,
}

impl From<IssuedToken> for TokenResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            expires_in: issued.expires_in(),
            access_token: issued.token,
            token_type: "Bearer".to_string(),
            expires_at: issued.session.expires_at,
            session_id: issued.session.session_id,
        }
    }
}

/// `POST /auth/token` body.
#[derive(Debug, Deserialize)]
pub struct TokenGrantRequest {
    /// `client_credentials` or `refresh_token`.
    pub grant_type: String,
    /// `client_credentials` only.
    #[serde(default)]
    pub client_id: Option<String>,
    /// `client_credentials` only.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Optional tenant scope for `client_credentials`.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// `refresh_token` only: the current access token.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// `POST /auth/authorize` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    /// Always `true`; failures never reach the handler.
    pub active: bool,
    /// Token subject.
    pub client_id: String,
    /// Tenant of the subject.
    pub tenant_id: String,
    /// Session backing the token.
    pub session_id: String,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
}

/// `POST /auth/client` body.
#[derive(Deserialize)]
pub struct UpsertClientRequest {
    /// Client to create or replace.
    pub client_id: String,
    /// New plaintext secret; stored only as a hash.
    pub secret: String,
    /// Defaults to the caller's tenant.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// `POST /auth/client` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpsertClientResponse {
    /// Client written.
    pub client_id: String,
    /// Tenant it belongs to.
    pub tenant_id: String,
    /// `false` when an existing record was replaced.
    pub created: bool,
}

// ── Route builder ─────────────────────────────────────────────────────────

/// Build the auth routes.
///
/// `/auth/login` sits behind the client gate and the session routes behind
/// the token gate. `/auth/token` authenticates inline, per grant.
pub fn auth_routes(state: Arc<AuthState>) -> Router {
    let client_gated = Router::new()
        .route("/auth/login", post(login))
        .route_layer(from_fn_with_state(Arc::clone(&state), require_client));

    let token_gated = Router::new()
        .route("/auth/authorize", post(authorize))
        .route("/auth/logout", get(logout))
        .route("/auth/session", get(session))
        .route("/auth/client", post(upsert_client))
        .route_layer(from_fn_with_state(Arc::clone(&state), require_token));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/jwks", get(jwks))
        .route("/auth/token", post(token_grant))
        .merge(client_gated)
        .merge(token_gated)
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn healthz() -> &'static str {
    "OK"
}

/// `GET /auth/jwks`
async fn jwks(State(state): State<Arc<AuthState>>) -> impl IntoResponse {
    Json(json!({ "keys": [state.keys.public_jwk()] }))
}

/// `POST /auth/login`. The client gate already resolved the client.
async fn login(
    State(state): State<Arc<AuthState>>,
    Extension(client): Extension<Client>,
) -> Response {
    issue(&state, &client).await
}

/// `POST /auth/token`
async fn token_grant(
    State(state): State<Arc<AuthState>>,
    Json(body): Json<TokenGrantRequest>,
) -> Response {
    match body.grant_type.as_str() {
        "client_credentials" => {
            let (Some(client_id), Some(secret)) = (body.client_id, body.client_secret) else {
                audit::emit(&AuditEvent::login_denied(None, "missing_credentials"));
                return Rejection::Unauthorized.into_response();
            };
            let credentials = ClientCredentials {
                client_id,
                secret,
                tenant_id: body.tenant_id,
            };

            if let Some(limiter) = &state.login_limiter
                && !limiter.check(&credentials.client_id)
            {
                audit::emit(&AuditEvent::login_denied(
                    Some(&credentials.client_id),
                    "rate_limited",
                ));
                return Rejection::RateLimited.into_response();
            }

            match client_gate(&state.authenticator, &credentials).await {
                Ok(client) => issue(&state, &client).await,
                Err(rejection) => rejection.into_response(),
            }
        }
        "refresh_token" => {
            let Some(token) = body.refresh_token else {
                audit::emit(&AuditEvent::rejected("missing_refresh_token"));
                return Rejection::Unauthorized.into_response();
            };
            let current = match check_token(&state.tokens, &token).await {
                Ok(current) => current,
                Err(rejection) => return rejection.into_response(),
            };
            let Some(client) = state.clients().get(&current.claims.sub).await else {
                audit::emit(&AuditEvent::rejected("client_not_found"));
                return Rejection::Unauthorized.into_response();
            };

            match state.tokens.refresh(&current, &client).await {
                Ok(issued) => (StatusCode::OK, Json(TokenResponse::from(issued))).into_response(),
                Err(e) => token_failure(&e),
            }
        }
        other => {
            warn!(grant_type = %other, "Unsupported grant_type");
            error_response(
                StatusCode::BAD_REQUEST,
                "unsupported_grant_type",
                "grant_type must be 'client_credentials' or 'refresh_token'",
            )
        }
    }
}

/// `POST /auth/authorize`
async fn authorize(Extension(auth): Extension<AuthorizedSession>) -> impl IntoResponse {
    Json(AuthorizeResponse {
        active: true,
        client_id: auth.claims.sub,
        tenant_id: auth.claims.tid,
        session_id: auth.session.session_id,
        expires_at: auth.session.expires_at,
    })
}

/// `GET /auth/logout`
async fn logout(
    State(state): State<Arc<AuthState>>,
    Extension(auth): Extension<AuthorizedSession>,
) -> Response {
    if let Err(e) = state.tokens.revoke_session(&auth.session.session_id).await {
        error!(error = %e, "Session vanished during logout");
        return internal_error();
    }
    audit::emit(&AuditEvent::revoked(&auth.claims));

    Json(json!({
        "revoked": true,
        "session_id": auth.session.session_id,
    }))
    .into_response()
}

/// `GET /auth/session`
async fn session(Extension(auth): Extension<AuthorizedSession>) -> impl IntoResponse {
    Json(auth.session)
}

/// `POST /auth/client`
async fn upsert_client(
    State(state): State<Arc<AuthState>>,
    Extension(auth): Extension<AuthorizedSession>,
    Json(body): Json<UpsertClientRequest>,
) -> Response {
    if body.client_id.trim().is_empty() || body.secret.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "client_id and secret are required",
        );
    }

    let caller_tenant = auth.claims.tid;
    let tenant_id = body.tenant_id.unwrap_or_else(|| caller_tenant.clone());
    if tenant_id != caller_tenant {
        warn!(caller = %auth.claims.sub, tenant = %tenant_id, "Cross-tenant client write refused");
        return forbidden();
    }

    let store = state.clients();
    if let Some(existing) = store.get(&body.client_id).await
        && existing.tenant_id != caller_tenant
    {
        warn!(caller = %auth.claims.sub, client_id = %body.client_id, "Client belongs to another tenant");
        return forbidden();
    }

    let created = store
        .upsert(Client {
            client_id: body.client_id.clone(),
            tenant_id: tenant_id.clone(),
            secret_hash: hash_secret(&body.secret),
        })
        .await;
    audit::emit(&AuditEvent::client_upserted(
        &body.client_id,
        &tenant_id,
        created,
    ));

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(UpsertClientResponse {
            client_id: body.client_id,
            tenant_id,
            created,
        }),
    )
        .into_response()
}

// ── Helpers ───────────────────────────────────────────────────────────────

async fn issue(state: &AuthState, client: &Client) -> Response {
    match state.tokens.issue_token(client).await {
        Ok(issued) => (StatusCode::OK, Json(TokenResponse::from(issued))).into_response(),
        Err(e) => token_failure(&e),
    }
}

fn token_failure(e: &TokenError) -> Response {
    if e.is_rejection() {
        audit::emit(&AuditEvent::rejected(e.reason()));
        return Rejection::Unauthorized.into_response();
    }
    error!(error = %e, "Token issuance failed");
    internal_error()
}

fn forbidden() -> Response {
    error_response(
        StatusCode::FORBIDDEN,
        "forbidden",
        "Clients can only be managed within the caller's tenant",
    )
}

fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Internal server error",
    )
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": error,
            "message": message,
        })),
    )
        .into_response()
}
