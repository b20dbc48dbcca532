//! Auth kernel server

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::auth::middleware::{LIMITER_SWEEP_INTERVAL, spawn_limiter_sweeper};
use crate::auth::{
    AuthState, ClientStore, InMemoryClientStore, InMemorySessionStore, handler::auth_routes,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ServerConfig};
use crate::keys::KeyManager;
use crate::{Error, Result};

/// Auth kernel server
pub struct Server {
    config: Config,
    state: Arc<AuthState>,
}

impl Server {
    /// Prepare the server: load or generate the signing key, seed the client
    /// store and assemble the auth state.
    ///
    /// Key loading runs to completion before anything is bound, so no request
    /// can observe a half-initialized key.
    pub async fn new(config: Config) -> Result<Self> {
        let keys = Arc::new(load_keys(&config).await?);

        let clients = Arc::new(InMemoryClientStore::new());
        for client in config.seed_clients()? {
            info!(client_id = %client.client_id, tenant_id = %client.tenant_id, "Seeded client");
            clients.upsert(client).await;
        }
        if clients.is_empty() {
            warn!("No clients configured - logins will fail until one is added");
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sessions = Arc::new(InMemorySessionStore::new(Arc::clone(&clock)));
        let state = Arc::new(AuthState::new(&config, keys, clients, sessions, clock));

        Ok(Self { config, state })
    }

    /// Shared auth state.
    #[must_use]
    pub fn state(&self) -> &Arc<AuthState> {
        &self.state
    }

    /// Router with all layers applied.
    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.state), &self.config.server)
    }

    /// Run the server until SIGINT/SIGTERM, then drain for at most
    /// `server.shutdown_timeout`.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("AUTH KERNEL v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            kid = %self.state.keys.key_id(),
            bits = self.state.keys.modulus_bits(),
            "Signing key active"
        );
        info!(
            ttl_secs = self.config.tokens.ttl.as_secs(),
            issuer = %self.config.tokens.issuer,
            login_rate_limit = self.config.login.rate_limit_per_minute,
            "Token policy"
        );

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        if let Some(limiter) = &self.state.login_limiter {
            spawn_limiter_sweeper(
                Arc::clone(limiter),
                LIMITER_SWEEP_INTERVAL,
                shutdown_rx.clone(),
            );
        }
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            })
            .into_future();
        let mut serve = tokio::spawn(serve);

        tokio::select! {
            finished = &mut serve => {
                return finished
                    .map_err(|e| Error::Internal(e.to_string()))?
                    .map_err(Error::Io);
            }
            () = shutdown_signal() => {}
        }

        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(self.config.server.shutdown_timeout, serve).await {
            Ok(finished) => finished
                .map_err(|e| Error::Internal(e.to_string()))?
                .map_err(Error::Io)?,
            Err(_) => warn!(
                timeout_secs = self.config.server.shutdown_timeout.as_secs(),
                "Shutdown timeout elapsed; dropping open connections"
            ),
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Load or generate the signing key on the blocking pool.
pub async fn load_keys(config: &Config) -> Result<KeyManager> {
    let path = config.keys.resolved_path()?;
    let bits = config.keys.bits;
    info!(path = %path.display(), "Loading signing key");

    tokio::task::spawn_blocking(move || KeyManager::load_or_generate(&path, bits))
        .await
        .map_err(|e| Error::Internal(format!("Key loading task failed: {e}")))?
        .map_err(Error::from)
}

/// Build the application router.
pub fn build_router(state: Arc<AuthState>, server: &ServerConfig) -> Router {
    auth_routes(state)
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(TimeoutLayer::new(server.request_timeout))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
