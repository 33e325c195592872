//! Login, federated handshake, and callback handlers.

use std::collections::HashMap;

use axum::Form;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};
use wru_auth::{RequestMeta, SessionStatus};

use crate::middleware::{MaybeSession, redirect_with_cookie, session_cookie};
use crate::server::AppState;
use crate::templates;

/// GET `/.wru/login` - the provider chooser, or the debug user form in dev
/// mode.
pub async fn login_page(State(state): State<AppState>) -> Html<String> {
    if state.config.dev_mode {
        Html(templates::render_debug_login_page(&state.register.all_users()))
    } else {
        Html(templates::render_login_page(&state.idps.available_tags()))
    }
}

#[derive(Debug, Deserialize)]
pub struct DebugLoginForm {
    userid: String,
}

/// POST `/.wru/login` - dev-mode login that trusts the posted user id.
pub async fn debug_login(
    State(state): State<AppState>,
    Extension(session): Extension<MaybeSession>,
    Extension(meta): Extension<RequestMeta>,
    Form(form): Form<DebugLoginForm>,
) -> Response {
    if !state.config.dev_mode {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    let user = match state.register.find_by_id(&form.userid) {
        Ok(user) => user,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                format!("user not found: {}", form.userid),
            )
                .into_response();
        }
    };

    let old_sid = match existing_or_new_session(&state, &session).await {
        Ok(sid) => sid,
        Err(response) => return response,
    };
    let info = HashMap::from([("login-idp".to_string(), "debug".to_string())]);

    match state
        .sessions
        .complete_login(&old_sid, &user, &meta, info)
        .await
    {
        Ok((sid, scratch)) => {
            info!(user_id = %user.user_id, "debug login");
            finish_login(&state, &sid, &scratch)
        }
        Err(err) => (StatusCode::BAD_REQUEST, format!("login error: {err}")).into_response(),
    }
}

/// GET `/.wru/login/{provider}` - starts a federated handshake and bounces
/// the browser to the provider.
pub async fn federated_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Extension(session): Extension<MaybeSession>,
) -> Response {
    let begin = match state.idps.begin(&provider).await {
        Ok(begin) => begin,
        Err(err) => {
            warn!(provider = %provider, "cannot start login: {err}");
            return (
                StatusCode::BAD_REQUEST,
                format!("cannot start login with {provider}"),
            )
                .into_response();
        }
    };

    let old_sid = match existing_or_new_session(&state, &session).await {
        Ok(sid) => sid,
        Err(response) => return response,
    };
    match state.sessions.attach_provider(&old_sid, begin.scratch).await {
        Ok(sid) => {
            let cookie = session_cookie(
                &state.config,
                &state.clock,
                &sid,
                SessionStatus::BeforeLogin,
            );
            redirect_with_cookie(&begin.redirect_url, &cookie)
        }
        Err(err) => (
            StatusCode::BAD_REQUEST,
            format!("session storage access error: {err}"),
        )
            .into_response(),
    }
}

/// GET `/.wru/callback` - completes the handshake the session is pending on.
pub async fn callback(
    State(state): State<AppState>,
    Extension(session): Extension<MaybeSession>,
    Extension(meta): Extension<RequestMeta>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    // Without the pending session there is nothing to complete; restart.
    let MaybeSession(Some(handle)) = session else {
        return (
            StatusCode::FOUND,
            [(header::LOCATION, "/.wru/login".to_string())],
        )
            .into_response();
    };

    let scratch = handle.data();
    let Some(tag) = scratch.get("idp").cloned() else {
        return (StatusCode::BAD_REQUEST, "no pending login handshake").into_response();
    };

    let completion = match state.idps.complete(&tag, &params, &scratch).await {
        Ok(completion) => completion,
        Err(err) => {
            // Details go to the log; the browser gets a generic retry.
            warn!(provider = %tag, "login handshake failed: {err}");
            return (
                StatusCode::FOUND,
                [(header::LOCATION, "/.wru/login?login_error".to_string())],
            )
                .into_response();
        }
    };

    let Some(kind) = wru_auth::ProviderKind::from_tag(&tag) else {
        return (StatusCode::BAD_REQUEST, format!("undefined provider: {tag}")).into_response();
    };
    let user = match state
        .register
        .find_by_federated(kind, &completion.external_id)
    {
        Ok(user) => user,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                format!("user not found: {} of {tag}", completion.external_id),
            )
                .into_response();
        }
    };

    match state
        .sessions
        .complete_login(handle.sid(), &user, &meta, completion.info)
        .await
    {
        Ok((sid, scratch)) => {
            info!(user_id = %user.user_id, provider = %tag, "login completed");
            finish_login(&state, &sid, &scratch)
        }
        Err(err) => (StatusCode::BAD_REQUEST, format!("login error: {err}")).into_response(),
    }
}

/// Reuses the caller's pre-login session or mints one for a direct entry to
/// the login endpoints.
async fn existing_or_new_session(
    state: &AppState,
    session: &MaybeSession,
) -> Result<String, Response> {
    if let MaybeSession(Some(handle)) = session {
        return Ok(handle.sid().to_string());
    }
    state
        .sessions
        .begin_login(HashMap::from([(
            "landing_url".to_string(),
            state.config.default_landing_page.clone(),
        )]))
        .await
        .map_err(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("session storage access error: {err}"),
            )
                .into_response()
        })
}

/// Sets the active-session cookie and redirects to the remembered landing
/// URL.
fn finish_login(state: &AppState, sid: &str, scratch: &HashMap<String, String>) -> Response {
    let cookie = session_cookie(&state.config, &state.clock, sid, SessionStatus::Active);
    let landing = scratch
        .get("landing_url")
        .cloned()
        .unwrap_or_else(|| state.config.default_landing_page.clone());
    redirect_with_cookie(&landing, &cookie)
}
