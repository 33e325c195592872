//! Logged-in account handlers: logout, profile, device sessions.

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use tracing::info;
use wru_auth::SingleSession;

use crate::handlers::wants_html;
use crate::middleware::{SessionHandle, removal_cookie};
use crate::server::AppState;
use crate::templates;

/// One row of the device session list.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: String,
    pub login_at: String,
    pub last_access_at: String,
    pub browser: String,
    pub os: String,
    pub idp: String,
    pub location: String,
    pub current: bool,
}

impl SessionView {
    fn from_session(session: &SingleSession, current_sid: &str) -> Self {
        Self {
            id: session.id.clone(),
            login_at: format_time(session.login_at),
            last_access_at: format_time(session.last_access_at),
            browser: session.browser().to_string(),
            os: session.os().to_string(),
            idp: session.idp().to_string(),
            location: session.location(),
            current: session.id == current_sid,
        }
    }
}

fn format_time(t: time::OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

/// GET `/.wru/logout` - destroys the caller's session and clears the cookie.
pub async fn logout(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = state.sessions.logout(handle.sid()).await {
        tracing::error!("logout failed: {err}");
        if wants_html(&headers) {
            return (
                StatusCode::FOUND,
                [(header::LOCATION, "/.wru/login?logout_error".to_string())],
            )
                .into_response();
        }
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error"}))).into_response();
    }

    info!(user_id = %handle.user_id(), "logged out");
    let cookie = removal_cookie(&state.config);
    if wants_html(&headers) {
        (
            StatusCode::FOUND,
            [
                (header::SET_COOKIE, cookie.to_string()),
                (header::LOCATION, "/.wru/login".to_string()),
            ],
        )
            .into_response()
    } else {
        (
            [(header::SET_COOKIE, cookie.to_string())],
            Json(json!({"status": "ok"})),
        )
            .into_response()
    }
}

/// GET `/.wru/user` - the caller's profile, as a page or JSON.
pub async fn user_profile(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    headers: HeaderMap,
) -> Response {
    let user_id = handle.user_id();
    let user = match state.register.find_by_id(&user_id) {
        Ok(user) => user,
        Err(_) => {
            return (StatusCode::NOT_FOUND, format!("user not found: {user_id}")).into_response();
        }
    };

    if wants_html(&headers) {
        Html(templates::render_user_page(&user)).into_response()
    } else {
        Json(user.as_ref().clone()).into_response()
    }
}

/// GET `/.wru/user/sessions` - the caller's live device sessions with the
/// current one flagged.
pub async fn user_sessions(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    headers: HeaderMap,
) -> Response {
    let user_id = handle.user_id();
    let sessions = match state.sessions.list_user_sessions(&user_id).await {
        Ok(sessions) => sessions,
        Err(err) => {
            tracing::error!("session list failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            )
                .into_response();
        }
    };
    let views: Vec<SessionView> = sessions
        .iter()
        .map(|s| SessionView::from_session(s, handle.sid()))
        .collect();

    if wants_html(&headers) {
        Html(templates::render_sessions_page(&views)).into_response()
    } else {
        Json(json!({ "sessions": views })).into_response()
    }
}

/// POST `/.wru/user/sessions/{session_id}/logout` - revokes one of the
/// caller's other device sessions.
pub async fn session_logout(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if session_id == handle.sid() {
        return (
            StatusCode::BAD_REQUEST,
            "target session must not be the current session",
        )
            .into_response();
    }

    // Only the caller's own sessions are in reach.
    let owned = state
        .sessions
        .list_user_sessions(&handle.user_id())
        .await
        .map(|sessions| sessions.iter().any(|s| s.id == session_id))
        .unwrap_or(false);
    if !owned {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    }

    if let Err(err) = state.sessions.logout(&session_id).await {
        tracing::error!("session revoke failed: {err}");
        if wants_html(&headers) {
            return (
                StatusCode::FOUND,
                [(
                    header::LOCATION,
                    "/.wru/user/sessions?logout_error".to_string(),
                )],
            )
                .into_response();
        }
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error"}))).into_response();
    }

    info!(user_id = %handle.user_id(), revoked = %session_id, "device session revoked");
    if wants_html(&headers) {
        (
            StatusCode::FOUND,
            [(header::LOCATION, "/.wru/user/sessions".to_string())],
        )
            .into_response()
    } else {
        Json(json!({"status": "ok"})).into_response()
    }
}
