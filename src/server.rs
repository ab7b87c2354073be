//!
//! keeper HTTP server
//! ------------------
//! Axum router for the vault API plus process startup and shutdown.
//!
//! Responsibilities:
//! - Bearer-token sessions: every route outside `api::PUBLIC_PATHS` runs behind
//!   `identity::bind_session`, and handlers receive the caller as `Identity`.
//! - Sign-up / sign-in (`server::auth`), vault read/write and uploads
//!   (`server::vault`), store health (`server::ping`).
//! - Request tracing and a per-request deadline; a request that runs past the
//!   deadline is dropped, which rolls back its open transaction.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{AUTH_SIGNIN_URI, AUTH_SIGNUP_URI, MAX_UPLOAD_BYTES, PING_URI, PUBLIC_PATHS, UPLOAD_URI, VAULT_URI};
use crate::config::ServerConfig;
use crate::identity::{bind_session, decode_key, generate_key, AuthProvider, SessionBinder, TokenService};
use crate::security::Hasher;
use crate::storage::{self, CredentialStore, HealthCheck, PgCredentialStore, PgHealth, PgVaultStore, VaultStore};

pub mod auth;
pub mod ping;
pub mod vault;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub vaults: Arc<dyn VaultStore>,
    pub health: Arc<dyn HealthCheck>,
    pub auth: Arc<AuthProvider>,
    pub sessions: SessionBinder,
}

impl AppState {
    pub fn new(
        users: Arc<dyn CredentialStore>,
        vaults: Arc<dyn VaultStore>,
        health: Arc<dyn HealthCheck>,
        hasher: Hasher,
        tokens: Arc<TokenService>,
    ) -> Self {
        let sessions = SessionBinder::new(tokens.clone(), users.clone(), PUBLIC_PATHS);
        let auth = Arc::new(AuthProvider::new(users, hasher, tokens));
        Self { vaults, health, auth, sessions }
    }
}

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let uploads = Router::new()
        .route(UPLOAD_URI, post(vault::upload))
        .route("/api/upload/{id}", post(vault::upload_into))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    Router::new()
        .route(AUTH_SIGNUP_URI, post(auth::sign_up))
        .route(AUTH_SIGNIN_URI, post(auth::sign_in))
        .route(VAULT_URI, post(vault::put).layer(DefaultBodyLimit::disable()))
        .route("/api/vault/", get(vault::missing_id))
        .route("/api/vault/{id}", get(vault::get))
        .route(PING_URI, get(ping::ping))
        .merge(uploads)
        .layer(middleware::from_fn_with_state(state.sessions.clone(), bind_session))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Connect to PostgreSQL, load or generate the signing key, and serve until SIGINT/SIGTERM.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!(target: "startup", "configuration: {:?}", config);

    let pool = storage::postgres::connect(&config.database_uri, config.pool_size)
        .context("While configuring the database pool")?;
    storage::postgres::ensure_schema(&pool)
        .await
        .context("While preparing the database schema")?;

    let key = match &config.jwt_secret_key {
        Some(encoded) => decode_key(encoded).context("While decoding the JWT secret key")?,
        None => {
            let key = generate_key().context("While generating a signing key")?;
            warn!(
                target: "startup",
                "no JWT secret key configured; using an ephemeral key, issued tokens stop working on restart"
            );
            key
        }
    };
    let tokens = Arc::new(TokenService::new(&key, config.token_ttl).context("While loading the signing key")?);

    let state = AppState::new(
        Arc::new(PgCredentialStore::new(pool.clone())),
        Arc::new(PgVaultStore::new(pool.clone())),
        Arc::new(PgHealth::new(pool)),
        Hasher::production(),
        tokens,
    );
    let app = router(state, config.request_timeout);

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("While binding {}", addr))?;
    info!(target: "startup", "Starting server on {}", listener.local_addr()?);
    serve(listener, app, shutdown_signal()).await?;
    info!(target: "startup", "server stopped");
    Ok(())
}

/// Serve `app` on `listener` until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(target: "startup", "cannot listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                warn!(target: "startup", "cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target: "startup", "shutdown requested");
}
