//! Application state, router assembly, and the server runner.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tracing::info;
use wru_auth::register::IdentityRegister;
use wru_auth::{Clock, IdpRegistry, SessionStore};

use crate::client_info::GeoResolver;
use crate::config::ServerConfig;
use crate::handlers::{account, login};
use crate::middleware::{must_login, must_not_login, proxy_gate};
use crate::proxy;

/// Everything a handler needs, passed explicitly instead of through process
/// globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub clock: Clock,
    pub sessions: Arc<SessionStore>,
    pub register: Arc<IdentityRegister>,
    pub idps: Arc<IdpRegistry>,
    pub geo: Arc<dyn GeoResolver>,
    pub http: reqwest::Client,
}

/// Builds the full application router: the reserved `/.wru` subtree plus the
/// reverse proxy fallback behind its session gate.
pub fn build_app(state: AppState) -> Router {
    let chooser = Router::new()
        .route("/login", get(login::login_page).post(login::debug_login))
        .route("/login/{provider}", get(login::federated_login))
        .route("/callback", get(login::callback))
        .layer(from_fn_with_state(state.clone(), must_not_login));

    let account_routes = Router::new()
        .route("/logout", get(account::logout))
        .route("/user", get(account::user_profile))
        .route("/user/sessions", get(account::user_sessions))
        .route(
            "/user/sessions/{session_id}/logout",
            post(account::session_logout),
        )
        .layer(from_fn_with_state(state.clone(), must_login));

    let forwarder = Router::new()
        .fallback(proxy::forward)
        .layer(from_fn_with_state(state.clone(), proxy_gate))
        .with_state(state.clone());

    Router::new()
        .nest("/.wru", chooser.merge(account_routes))
        .fallback_service(forwarder)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The assembled server, ready to run.
pub struct WruServer {
    addr: SocketAddr,
    tls: Option<(String, String)>,
    app: Router,
}

impl WruServer {
    /// Builds the server from the application state.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
        let tls = state
            .config
            .tls_cert
            .clone()
            .zip(state.config.tls_key.clone());
        Self {
            addr,
            tls,
            app: build_app(state),
        }
    }

    /// Serves until interrupted. TLS is used when a certificate and key are
    /// configured.
    pub async fn run(self) -> anyhow::Result<()> {
        let service = self
            .app
            .into_make_service_with_connect_info::<SocketAddr>();

        match self.tls {
            Some((cert, key)) => {
                let tls_config =
                    axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key).await?;
                info!(addr = %self.addr, "starting wru server (https)");
                let handle = axum_server::Handle::new();
                let shutdown_handle = handle.clone();
                tokio::spawn(async move {
                    shutdown_signal().await;
                    shutdown_handle
                        .graceful_shutdown(Some(std::time::Duration::from_secs(10)));
                });
                axum_server::bind_rustls(self.addr, tls_config)
                    .handle(handle)
                    .serve(service)
                    .await?;
            }
            None => {
                let listener = tokio::net::TcpListener::bind(self.addr).await?;
                info!(addr = %self.addr, "starting wru server (http)");
                axum::serve(listener, service)
                    .with_graceful_shutdown(shutdown_signal())
                    .await?;
            }
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
