//! User table loading and hot reload.
//!
//! The table lives either on the local filesystem (`.`/`/`-prefixed specs) or
//! behind an HTTP URL. Loads are change-aware: the file modification time or
//! the HTTP `Last-Modified`/304 handshake short-circuits an unchanged source.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;
use crate::register::IdentityRegister;
use crate::register::csv::parse_user_csv;

/// Where the user table lives.
#[derive(Debug, Clone)]
pub enum UserTableSource {
    /// A local CSV file.
    File(PathBuf),
    /// A CSV document behind an HTTP URL.
    Remote(Url),
}

impl UserTableSource {
    /// Parses a table spec: `.`/`/`-prefixed specs are local paths, anything
    /// else must be an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for specs that are neither.
    pub fn parse(spec: &str) -> AuthResult<Self> {
        if spec.starts_with('.') || spec.starts_with('/') {
            return Ok(Self::File(PathBuf::from(spec)));
        }
        let url = Url::parse(spec)
            .map_err(|e| AuthError::configuration(format!("invalid user table url {spec}: {e}")))?;
        Ok(Self::Remote(url))
    }
}

/// Change-aware loader feeding a [`IdentityRegister`].
pub struct UserTableLoader {
    source: UserTableSource,
    client: reqwest::Client,
    /// File modification time or HTTP Last-Modified of the last load.
    version: Mutex<Option<String>>,
}

impl UserTableLoader {
    /// Creates a loader for `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when the spec is invalid.
    pub fn new(spec: &str, client: reqwest::Client) -> AuthResult<Self> {
        Ok(Self {
            source: UserTableSource::parse(spec)?,
            client,
            version: Mutex::new(None),
        })
    }

    /// Loads the table if it changed since the last load and swaps the
    /// register's index.
    ///
    /// Returns `None` when the source is unchanged, otherwise the number of
    /// users loaded plus any parse warnings.
    pub async fn load(&self, register: &IdentityRegister) -> AuthResult<Option<(usize, Vec<String>)>> {
        let previous = self.version.lock().clone();
        let Some((text, version)) = self.fetch(previous.as_deref()).await? else {
            return Ok(None);
        };

        let (users, warnings) = parse_user_csv(&text)?;
        let count = users.len();
        register.replace_all(users);
        *self.version.lock() = version;
        Ok(Some((count, warnings)))
    }

    async fn fetch(&self, previous: Option<&str>) -> AuthResult<Option<(String, Option<String>)>> {
        match &self.source {
            UserTableSource::File(path) => {
                let meta = tokio::fs::metadata(path).await.map_err(|e| {
                    AuthError::configuration(format!("user table {}: {e}", path.display()))
                })?;
                let version = meta.modified().ok().map(|t| format!("{t:?}"));
                if version.is_some() && version.as_deref() == previous {
                    return Ok(None);
                }
                let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                    AuthError::configuration(format!("user table {}: {e}", path.display()))
                })?;
                Ok(Some((text, version)))
            }
            UserTableSource::Remote(url) => {
                let mut request = self.client.get(url.clone());
                if let Some(stamp) = previous {
                    request = request.header(reqwest::header::IF_MODIFIED_SINCE, stamp);
                }
                let response = request.send().await.map_err(|e| {
                    AuthError::configuration(format!("user table {url}: {e}"))
                })?;
                if response.status() == reqwest::StatusCode::NOT_MODIFIED {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    return Err(AuthError::configuration(format!(
                        "user table {url}: http status {}",
                        response.status()
                    )));
                }
                let version = response
                    .headers()
                    .get(reqwest::header::LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                let text = response.text().await.map_err(|e| {
                    AuthError::configuration(format!("user table {url}: {e}"))
                })?;
                Ok(Some((text, version)))
            }
        }
    }
}

/// Spawns the background reload task.
///
/// Each tick re-reads the table; unchanged sources are skipped, reload
/// failures are logged and retried on the next tick. Abort the returned
/// handle to stop the task.
pub fn spawn_reload(
    loader: Arc<UserTableLoader>,
    register: Arc<IdentityRegister>,
    period: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick fires immediately; the initial load already happened.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match loader.load(&register).await {
                Ok(Some((count, warnings))) => {
                    info!(users = count, "reloaded user table");
                    for warning in warnings {
                        warn!("user table warning: {warning}");
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("user table reload failed: {err}"),
            }
        }
    })
}
