//! The reverse proxy handler.
//!
//! Routes by path prefix against the configured forward table, injects the
//! session descriptor header for the backend, and harvests the
//! `Wru-Set-Session-Data` directives from the backend response before it is
//! returned to the client.

use axum::body::Body;
use axum::extract::{Extension, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, warn};
use wru_auth::{Directive, parse_directive};

use crate::config::match_route;
use crate::middleware::SessionHandle;
use crate::server::AppState;

/// Backend response header carrying session data directives.
pub const SET_SESSION_DATA_HEADER: &str = "Wru-Set-Session-Data";

/// Upstream request body cap, same order as the gateway default.
const MAX_BODY_BYTES: usize = 10_000_000;

/// Forwards an authenticated request to the backend owning its path prefix.
///
/// The session gate in front of this handler guarantees an active session;
/// the scope check is per route.
pub async fn forward(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    req: Request,
) -> Response {
    let path = req.uri().path().to_string();
    // The reserved subtree is owned by the proxy and never forwarded, even
    // when a catch-all route exists.
    if path == "/.wru" || path.starts_with("/.wru/") {
        return (StatusCode::NOT_FOUND, Json(json!({"status": "not found"}))).into_response();
    }
    let Some(route) = match_route(&state.config.forward_to, &path).cloned() else {
        return (StatusCode::NOT_FOUND, Json(json!({"status": "not found"}))).into_response();
    };

    let snapshot = handle.snapshot();
    if !snapshot.has_scopes(&route.scopes) {
        debug!(path = %path, user_id = %snapshot.user_id, "missing required scope");
        return (StatusCode::FORBIDDEN, Json(json!({"status": "forbidden"}))).into_response();
    }

    // Rewrite the target to the upstream origin, keeping path and query.
    let mut target = route.upstream.clone();
    target.set_path(&path);
    target.set_query(req.uri().query());

    let method = req.method().clone();
    let mut upstream_headers = HeaderMap::new();
    for (name, value) in req.headers() {
        if is_hop_by_hop_header(name.as_str())
            || name.as_str().eq_ignore_ascii_case(&state.config.server_session_header)
        {
            continue;
        }
        upstream_headers.insert(name.clone(), value.clone());
    }
    match serde_json::to_string(&snapshot) {
        Ok(session_json) => match HeaderValue::from_str(&session_json) {
            Ok(value) => {
                upstream_headers.insert(
                    header::HeaderName::try_from(state.config.server_session_header.as_str())
                        .unwrap_or(header::HeaderName::from_static("wru-session")),
                    value,
                );
            }
            Err(err) => warn!("session header value rejected: {err}"),
        },
        Err(err) => warn!("session serialization failed: {err}"),
    }

    let body = match axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {err}"),
            )
                .into_response();
        }
    };

    let upstream_response = match state
        .http
        .request(method, target)
        .headers(upstream_headers)
        .body(body.to_vec())
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!(upstream = %route.upstream, "upstream request failed: {err}");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({"status": "bad gateway"})),
            )
                .into_response();
        }
    };

    // Harvest directives before the response goes back to the client so the
    // write is visible to the session's next request.
    let mut directives: Vec<Directive> = Vec::new();
    for value in upstream_response.headers().get_all(SET_SESSION_DATA_HEADER) {
        let Ok(text) = value.to_str() else {
            warn!("ignoring non-text session data directive");
            continue;
        };
        match parse_directive(text) {
            Ok(directive) => directives.push(directive),
            Err(err) => {
                warn!(upstream = %route.upstream, "bad session data directive: {err}");
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({"status": "bad gateway"})),
                )
                    .into_response();
            }
        }
    }
    if let Err(err) = state
        .sessions
        .apply_directives(handle.sid(), &directives)
        .await
        && !err.is_invalid_token()
    {
        warn!(session_id = %handle.sid(), "directive application failed: {err}");
    }

    let status = upstream_response.status();
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if is_hop_by_hop_header(name.as_str())
            || name.as_str().eq_ignore_ascii_case(SET_SESSION_DATA_HEADER)
        {
            continue;
        }
        builder = builder.header(name, value);
    }

    let response_body = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(upstream = %route.upstream, "failed to read upstream body: {err}");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({"status": "bad gateway"})),
            )
                .into_response();
        }
    };
    builder
        .body(Body::from(response_body))
        .unwrap_or_else(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to build response: {err}"),
            )
                .into_response()
        })
}

/// Hop-by-hop headers per RFC 2616 section 13.5.1; never forwarded in either
/// direction. Host is set from the upstream target instead.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hop_by_hop_header() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("Transfer-Encoding"));
        assert!(is_hop_by_hop_header("host"));
        assert!(!is_hop_by_hop_header("Content-Type"));
        assert!(!is_hop_by_hop_header("Cookie"));
    }
}
