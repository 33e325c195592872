//! HTTP handlers for the reserved `/.wru` path.

pub mod account;
pub mod login;

use axum::http::HeaderMap;
use axum::http::header::ACCEPT;

/// Content negotiation between the HTML pages and the JSON API.
///
/// JSON is chosen only when the client asks for `application/json` without
/// also accepting HTML; everything else gets HTML.
#[must_use]
pub fn wants_html(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(ACCEPT).and_then(|v| v.to_str().ok()) else {
        return true;
    };
    !(accept.contains("application/json") && !accept.contains("text/html"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_accept(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_defaults_to_html() {
        assert!(wants_html(&HeaderMap::new()));
        assert!(wants_html(&headers_with_accept("*/*")));
        assert!(wants_html(&headers_with_accept("text/html,application/json")));
    }

    #[test]
    fn test_json_only_accept_gets_json() {
        assert!(!wants_html(&headers_with_accept("application/json")));
    }
}
