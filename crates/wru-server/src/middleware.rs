//! Request pipeline: session attachment, guards, cookies, directive flush.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, Uri, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use cookie::{Cookie, Expiration, SameSite};
use time::macros::datetime;
use tracing::warn;
use wru_auth::{Clock, Directive, Session, SessionStatus};

use crate::client_info::request_meta;
use crate::config::{CookieMode, ServerConfig};
use crate::server::AppState;

/// Request-scoped handle to the caller's session.
///
/// Cloned into the request extensions by the guards; handlers queue data
/// mutations through it and the pipeline flushes them after the handler
/// returns.
#[derive(Clone)]
pub struct SessionHandle {
    sid: String,
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    /// Wraps a looked-up session.
    #[must_use]
    pub fn new(sid: String, session: Session) -> Self {
        Self {
            sid,
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// The session token from the cookie.
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// The derived session status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.lock().expect("session lock poisoned").status
    }

    /// The logged-in user id, empty before login.
    #[must_use]
    pub fn user_id(&self) -> String {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .user_id
            .clone()
    }

    /// A clone of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.inner.lock().expect("session lock poisoned").clone()
    }

    /// A copy of the session data bag (the handshake scratch state for a
    /// pre-login session).
    #[must_use]
    pub fn data(&self) -> HashMap<String, String> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .data
            .clone()
    }

    /// Queues an upsert of a session data key.
    pub fn add_session_data(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .add_session_data(key, value);
    }

    /// Queues a deletion of a session data key.
    pub fn remove_session_data(&self, key: impl Into<String>) {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .remove_session_data(key);
    }

    /// Drains the queued directives.
    pub fn take_directives(&self) -> Vec<Directive> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .take_directives()
    }
}

/// The caller's session when one exists. Inserted by the login-side guard so
/// handlers never race the extension lookup.
#[derive(Clone, Default)]
pub struct MaybeSession(pub Option<SessionHandle>);

/// Builds the session cookie for `sid`.
///
/// Pre-login cookies live for the login timeout, active ones for the
/// absolute timeout. `Secure` follows the configured public host scheme and
/// `HttpOnly` follows the cookie mode.
#[must_use]
pub fn session_cookie(
    config: &ServerConfig,
    clock: &Clock,
    sid: &str,
    status: SessionStatus,
) -> Cookie<'static> {
    let lifetime = match status {
        SessionStatus::BeforeLogin => config.timeouts.login,
        _ => config.timeouts.absolute,
    };
    let mut cookie = Cookie::new(config.cookie_name.clone(), sid.to_string());
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(config.is_https());
    cookie.set_http_only(config.cookie_mode == CookieMode::Cookie);
    cookie.set_expires(Expiration::DateTime(clock.now() + lifetime));
    cookie
}

/// Builds the removal cookie (epoch expiry).
#[must_use]
pub fn removal_cookie(config: &ServerConfig) -> Cookie<'static> {
    let mut cookie = Cookie::new(config.cookie_name.clone(), String::new());
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(config.is_https());
    cookie.set_http_only(config.cookie_mode == CookieMode::Cookie);
    cookie.set_expires(Expiration::DateTime(datetime!(1980-01-01 00:00:00 UTC)));
    cookie
}

/// A 302 that also sets a cookie. The cookie header precedes the redirect in
/// the same response.
#[must_use]
pub fn redirect_with_cookie(location: &str, cookie: &Cookie<'static>) -> Response {
    (
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, cookie.to_string()),
            (header::LOCATION, location.to_string()),
        ],
    )
        .into_response()
}

/// Resolves the session cookie into a snapshot, if any.
pub async fn lookup_session(state: &AppState, jar: &CookieJar) -> Option<(String, Session)> {
    let sid = jar.get(&state.config.cookie_name)?.value().to_string();
    if sid.is_empty() {
        return None;
    }
    match state.sessions.lookup(&sid).await {
        Ok(session) => Some((sid, session)),
        Err(err) => {
            if !err.is_invalid_token() {
                warn!("session lookup failed: {err}");
            }
            None
        }
    }
}

/// Starts a pre-login session remembering the requested URL, sets the cookie,
/// and bounces the browser to the login chooser.
pub async fn start_pre_login(state: &AppState, uri: &Uri) -> Response {
    let landing = uri
        .path_and_query()
        .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string());
    match state
        .sessions
        .begin_login(HashMap::from([("landing_url".to_string(), landing)]))
        .await
    {
        Ok(sid) => {
            let cookie = session_cookie(
                &state.config,
                &state.clock,
                &sid,
                SessionStatus::BeforeLogin,
            );
            redirect_with_cookie("/.wru/login", &cookie)
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("internal server error: {err}"),
        )
            .into_response(),
    }
}

/// Guard for the `/.wru` account endpoints: the caller must have a session
/// that is active or mid-handshake; anyone else is bounced into a fresh
/// login flow.
pub async fn must_login(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    match lookup_session(&state, &jar).await {
        Some((sid, session))
            if matches!(
                session.status,
                SessionStatus::Active | SessionStatus::BeforeLogin
            ) =>
        {
            let handle = SessionHandle::new(sid, session);
            req.extensions_mut().insert(handle.clone());
            let response = next.run(req).await;
            flush_directives(&state, &handle, false).await;
            response
        }
        _ => start_pre_login(&state, req.uri()).await,
    }
}

/// Guard for the login endpoints: an already-active caller is sent to the
/// landing page instead of a second handshake.
///
/// Pass-through requests get a [`MaybeSession`] plus the extracted request
/// metadata, so the login handlers have everything they need to promote a
/// session.
pub async fn must_not_login(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let session = match lookup_session(&state, &jar).await {
        Some((_, session)) if session.status == SessionStatus::Active => {
            return (
                StatusCode::FOUND,
                [(header::LOCATION, state.config.default_landing_page.clone())],
            )
                .into_response();
        }
        Some((sid, session)) => MaybeSession(Some(SessionHandle::new(sid, session))),
        None => MaybeSession(None),
    };

    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let meta = request_meta(req.headers(), remote_addr, state.geo.as_ref());
    req.extensions_mut().insert(session);
    req.extensions_mut().insert(meta);
    next.run(req).await
}

/// Gate in front of the reverse proxy: only active sessions pass; the
/// favicon probe is answered directly so browsers do not mint throwaway
/// pre-login sessions.
///
/// After the proxied response is built, handler-queued directives are
/// flushed and the session's last access time is stamped, so the write is
/// visible to the client's next request.
pub async fn proxy_gate(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    match lookup_session(&state, &jar).await {
        Some((sid, session)) if session.status == SessionStatus::Active => {
            let handle = SessionHandle::new(sid, session);
            req.extensions_mut().insert(handle.clone());
            let response = next.run(req).await;
            flush_directives(&state, &handle, true).await;
            response
        }
        _ => {
            if req.uri().path() == "/favicon.ico" {
                return (StatusCode::NOT_FOUND, "not found").into_response();
            }
            start_pre_login(&state, req.uri()).await
        }
    }
}

/// Flushes queued directives. With `stamp` set an empty queue still reaches
/// the store so the access time moves forward.
async fn flush_directives(state: &AppState, handle: &SessionHandle, stamp: bool) {
    let directives = handle.take_directives();
    if directives.is_empty() && !stamp {
        return;
    }
    if let Err(err) = state
        .sessions
        .apply_directives(handle.sid(), &directives)
        .await
        && !err.is_invalid_token()
    {
        warn!(session_id = %handle.sid(), "directive flush failed: {err}");
    }
}
