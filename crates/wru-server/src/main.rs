use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use wru_auth::idp::{DebugProvider, GitHubProvider, IdpRegistry, OidcProvider, TwitterProvider};
use wru_auth::register::reload::{UserTableLoader, spawn_reload};
use wru_auth::register::{IdentityRegister, parse_env_users};
use wru_auth::{Clock, SessionStore};
use wru_server::client_info::NoGeoIp;
use wru_server::{AppState, ServerConfig, WruServer, init_tracing};
use wru_storage::{DynDocumentStore, MemoryDocumentStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env().context("parse config")?;
    config.validate().context("validate config")?;
    config.summarize();

    let http = reqwest::Client::new();
    let storage = open_storage(&config)?;
    let clock = Clock::system();
    let sessions = Arc::new(SessionStore::new(storage, clock.clone(), config.timeouts));

    let register = Arc::new(IdentityRegister::new());
    if let Some(table) = &config.user_table {
        let loader = Arc::new(UserTableLoader::new(table, http.clone()).context("user table")?);
        let loaded = loader
            .load(&register)
            .await
            .context("read user table")?;
        if let Some((count, warnings)) = loaded {
            info!(users = count, table = %table, "read user table");
            for warning in warnings {
                warn!("user parse warning: {warning}");
            }
        }
        if let Some(period) = config.user_table_reload {
            let _reload_task = spawn_reload(loader, register.clone(), period);
            info!(period = ?period, "user table hot reload enabled");
        }
    } else {
        let (users, warnings) = parse_env_users(std::env::vars());
        info!(users = users.len(), "read users from environment");
        for warning in warnings {
            warn!("user parse warning: {warning}");
        }
        register.replace_all(users);
    }

    let idps = build_idp_registry(&config, &http).await?;
    if config.geoip_database.is_some() {
        warn!("WRU_GEOIP_DATABASE is set but no GeoIP backend is wired in; locations stay unknown");
    }

    let state = AppState {
        config: Arc::new(config),
        clock,
        sessions,
        register,
        idps: Arc::new(idps),
        geo: Arc::new(NoGeoIp),
        http,
    };
    WruServer::new(state).run().await
}

fn open_storage(config: &ServerConfig) -> anyhow::Result<DynDocumentStore> {
    match config.session_storage.as_str() {
        "" | "mem://" => Ok(Arc::new(MemoryDocumentStore::new())),
        other => anyhow::bail!("unsupported session storage backend: {other}"),
    }
}

async fn build_idp_registry(
    config: &ServerConfig,
    http: &reqwest::Client,
) -> anyhow::Result<IdpRegistry> {
    let mut idps = IdpRegistry::new();

    if config.twitter.available() {
        idps.register(Arc::new(TwitterProvider::new(
            config.twitter.clone(),
            &config.host,
            http.clone(),
        )));
        info!("Twitter login: enabled");
    } else {
        info!("Twitter login: disabled");
    }

    if config.github.available() {
        idps.register(Arc::new(GitHubProvider::new(
            config.github.clone(),
            &config.host,
            http.clone(),
        )));
        info!("GitHub login: enabled");
    } else {
        info!("GitHub login: disabled");
    }

    if config.oidc.available() {
        let provider = OidcProvider::discover(config.oidc.clone(), &config.host, http.clone())
            .await
            .context("OpenID Connect discovery")?;
        idps.register(Arc::new(provider));
        info!("OpenID Connect login: enabled");
    } else {
        info!("OpenID Connect login: disabled");
    }

    if config.dev_mode {
        idps.register(Arc::new(DebugProvider::new()));
        info!("debug login: enabled (dev mode)");
    }

    if idps.is_empty() {
        anyhow::bail!("no identity provider is available");
    }
    Ok(idps)
}
