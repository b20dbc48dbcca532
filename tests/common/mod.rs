//! Shared harness for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, LazyLock};

use auth_kernel::auth::{AuthState, ClientStore, InMemoryClientStore, InMemorySessionStore};
use auth_kernel::clock::ManualClock;
use auth_kernel::config::{ClientConfig, Config};
use auth_kernel::keys::KeyManager;
use auth_kernel::server::build_router;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::rand_core::OsRng;
use serde_json::{Value, json};
use tower::ServiceExt;

/// One signing key per test binary; RSA generation is slow.
pub static KEYS: LazyLock<Arc<KeyManager>> = LazyLock::new(|| {
    let private = RsaPrivateKey::new(&mut OsRng, 2048).expect("generate test key");
    let pem = private.to_pkcs8_pem(LineEnding::LF).expect("encode test key");
    Arc::new(KeyManager::from_pkcs8_pem(&pem).expect("load test key"))
});

pub struct Harness {
    pub router: Router,
    pub state: Arc<AuthState>,
    pub clock: Arc<ManualClock>,
}

fn declared(client_id: &str, tenant_id: &str, secret: &str) -> ClientConfig {
    ClientConfig {
        client_id: client_id.to_string(),
        tenant_id: tenant_id.to_string(),
        secret: Some(secret.to_string()),
        secret_hash: None,
    }
}

/// c1/s1 in tenant acme, c2/s2 in tenant globex, no login throttle.
pub fn config() -> Config {
    let mut config = Config {
        clients: vec![declared("c1", "acme", "s1"), declared("c2", "globex", "s2")],
        ..Default::default()
    };
    config.login.rate_limit_per_minute = 0;
    config
}

pub async fn harness_with(config: Config) -> Harness {
    let clock = ManualClock::new();
    let clients = Arc::new(InMemoryClientStore::new());
    for client in config.seed_clients().expect("seed clients") {
        clients.upsert(client).await;
    }
    let sessions = Arc::new(InMemorySessionStore::new(clock.clone()));
    let state = Arc::new(AuthState::new(
        &config,
        Arc::clone(&KEYS),
        clients,
        sessions,
        clock.clone(),
    ));

    Harness {
        router: build_router(Arc::clone(&state), &config.server),
        state,
        clock,
    }
}

pub async fn harness() -> Harness {
    harness_with(config()).await
}

/// Response status and JSON body (`Null` when the body is not JSON).
pub struct Reply {
    pub status: StatusCode,
    pub www_authenticate: Option<String>,
    pub body: Value,
}

impl Harness {
    pub async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let www_authenticate = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            www_authenticate,
            body,
        }
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Reply {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn login(&self, client_id: &str, secret: &str) -> Reply {
        self.post_json(
            "/auth/login",
            json!({"client_id": client_id, "secret": secret}),
        )
        .await
    }

    pub async fn login_basic(&self, client_id: &str, secret: &str) -> Reply {
        let credentials = STANDARD.encode(format!("{client_id}:{secret}"));
        self.send(
            Request::post("/auth/login")
                .header(header::AUTHORIZATION, format!("Basic {credentials}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Log in and return the access token.
    pub async fn token(&self, client_id: &str, secret: &str) -> String {
        let reply = self.login(client_id, secret).await;
        assert_eq!(reply.status, StatusCode::OK, "login failed: {}", reply.body);
        reply.body["access_token"].as_str().unwrap().to_string()
    }

    pub async fn with_token(&self, method: &str, uri: &str, token: &str, body: Option<Value>) -> Reply {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        self.send(request.unwrap()).await
    }

    pub async fn authorize(&self, token: &str) -> Reply {
        self.with_token("POST", "/auth/authorize", token, None).await
    }

    pub async fn logout(&self, token: &str) -> Reply {
        self.with_token("GET", "/auth/logout", token, None).await
    }
}

/// The one body every credential or token failure produces.
pub fn unauthorized_body() -> Value {
    json!({"error": "unauthorized", "message": "Authentication required"})
}
