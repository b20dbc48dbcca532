//! Audit logging for credential and session lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with the event serialized as
//! JSON in the `audit` field, so the trail is queryable by any log
//! aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `login.succeeded` | Client credentials were accepted |
//! | `login.denied` | Client credentials were rejected or throttled |
//! | `session.issued` | A session was created and its token signed |
//! | `session.refreshed` | A session was rotated via the refresh grant |
//! | `session.revoked` | A session was revoked by logout |
//! | `token.rejected` | A bearer token failed verification |
//! | `client.upserted` | A client record was created or replaced |
//!
//! Secrets and token strings never appear in events.

use serde::Serialize;

use super::token::Claims;

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g. `"session.issued"`).
    pub event: &'static str,
    /// Client involved (claimed id for denied logins).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Tenant of the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Affected session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Session replaced by a refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<String>,
    /// Expiry of an issued session, Unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Machine-readable reason for denial events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            client_id: None,
            tenant_id: None,
            session_id: None,
            previous_session_id: None,
            expires_at: None,
            reason: None,
        }
    }

    /// `login.succeeded`
    #[must_use]
    pub fn login_succeeded(client_id: &str, tenant_id: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            tenant_id: Some(tenant_id.to_string()),
            ..Self::new("login.succeeded")
        }
    }

    /// `login.denied`. `client_id` is the claimed id, which may not exist.
    #[must_use]
    pub fn login_denied(client_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            client_id: client_id.map(str::to_string),
            reason: Some(reason.into()),
            ..Self::new("login.denied")
        }
    }

    /// `session.issued`
    #[must_use]
    pub fn issued(claims: &Claims) -> Self {
        Self {
            client_id: Some(claims.sub.clone()),
            tenant_id: Some(claims.tid.clone()),
            session_id: Some(claims.sid.clone()),
            expires_at: Some(claims.exp),
            ..Self::new("session.issued")
        }
    }

    /// `session.refreshed`
    #[must_use]
    pub fn refreshed(previous_session_id: &str, claims: &Claims) -> Self {
        Self {
            previous_session_id: Some(previous_session_id.to_string()),
            ..Self {
                event: "session.refreshed",
                ..Self::issued(claims)
            }
        }
    }

    /// `session.revoked`
    #[must_use]
    pub fn revoked(claims: &Claims) -> Self {
        Self {
            client_id: Some(claims.sub.clone()),
            tenant_id: Some(claims.tid.clone()),
            session_id: Some(claims.sid.clone()),
            ..Self::new("session.revoked")
        }
    }

    /// `token.rejected`
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new("token.rejected")
        }
    }

    /// `client.upserted`. `reason` records whether the record was created.
    #[must_use]
    pub fn client_upserted(client_id: &str, tenant_id: &str, created: bool) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            tenant_id: Some(tenant_id.to_string()),
            reason: Some(if created { "created" } else { "replaced" }.to_string()),
            ..Self::new("client.upserted")
        }
    }
}

/// Emit an audit event via `tracing::info!`.
///
/// ```text
/// INFO auth_kernel::auth::audit audit={"event":"session.issued","client_id":...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "auth audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            iss: "auth-kernel".to_string(),
            sub: "c1".to_string(),
            tid: "acme".to_string(),
            sid: "sess-1".to_string(),
            iat: 1_700_000_000,
            exp: 1_700_000_900,
        }
    }

    #[test]
    fn issued_event_carries_session_fields() {
        // GIVEN/WHEN: an issued event
        let event = AuditEvent::issued(&claims());

        // THEN: identity and session are populated
        assert_eq!(event.event, "session.issued");
        assert_eq!(event.client_id.as_deref(), Some("c1"));
        assert_eq!(event.session_id.as_deref(), Some("sess-1"));
        assert_eq!(event.expires_at, Some(1_700_000_900));
        assert!(event.reason.is_none());
    }

    #[test]
    fn refreshed_event_links_previous_session() {
        let event = AuditEvent::refreshed("sess-0", &claims());

        assert_eq!(event.event, "session.refreshed");
        assert_eq!(event.previous_session_id.as_deref(), Some("sess-0"));
        assert_eq!(event.session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn denial_events_carry_reason_only() {
        let event = AuditEvent::rejected("expired");

        assert_eq!(event.event, "token.rejected");
        assert_eq!(event.reason.as_deref(), Some("expired"));
        assert!(event.client_id.is_none());
        assert!(event.session_id.is_none());
    }

    #[test]
    fn absent_fields_are_omitted_from_json() {
        let json = serde_json::to_value(AuditEvent::login_denied(Some("c1"), "invalid_credentials"))
            .unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "event": "login.denied",
                "client_id": "c1",
                "reason": "invalid_credentials"
            })
        );
    }

    #[test]
    fn upsert_event_distinguishes_create_and_replace() {
        assert_eq!(
            AuditEvent::client_upserted("c2", "acme", true).reason.as_deref(),
            Some("created")
        );
        assert_eq!(
            AuditEvent::client_upserted("c2", "acme", false).reason.as_deref(),
            Some("replaced")
        );
    }

    #[test]
    fn emit_does_not_panic() {
        emit(&AuditEvent::revoked(&claims()));
        emit(&AuditEvent::login_succeeded("c1", "acme"));
    }
}
