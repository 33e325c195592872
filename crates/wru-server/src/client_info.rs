//! Device and network metadata extraction for login records.
//!
//! Everything here is advisory: the values feed the session list UI and the
//! login log, never an authorization decision.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use wru_auth::RequestMeta;

/// Resolves a country name from a client IP.
///
/// The proxy core treats geo lookup as an external collaborator; the default
/// implementation resolves nothing.
pub trait GeoResolver: Send + Sync {
    /// Country name for `ip`, or `None` when unknown.
    fn country(&self, ip: &str) -> Option<String>;
}

/// No-op resolver used when no GeoIP backend is wired in.
#[derive(Debug, Default)]
pub struct NoGeoIp;

impl GeoResolver for NoGeoIp {
    fn country(&self, _ip: &str) -> Option<String> {
        None
    }
}

/// Builds the login metadata for a request.
#[must_use]
pub fn request_meta(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    geo: &dyn GeoResolver,
) -> RequestMeta {
    let ua = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let (browser, version) = detect_browser(ua);
    let ip = client_ip(headers, remote_addr);
    let country = geo.country(&ip).unwrap_or_else(|| "unknown".to_string());

    RequestMeta {
        browser: browser.to_string(),
        version,
        os: detect_os(ua).to_string(),
        platform: detect_platform(ua).to_string(),
        ip,
        country,
    }
}

/// Extracts the original client IP, preferring proxy headers.
///
/// `Forwarded` wins over `X-Forwarded-For` over `X-Real-IP`; the first hop in
/// a comma list is the client.
#[must_use]
pub fn client_ip(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> String {
    if let Some(value) = header_str(headers, "forwarded") {
        let first = value.split(',').next().unwrap_or("").trim();
        // RFC 7239 element: `for=1.2.3.4;proto=https`
        for pair in first.split(';') {
            if let Some(addr) = pair.trim().strip_prefix("for=") {
                return addr.trim_matches('"').to_string();
            }
        }
        if !first.is_empty() {
            return first.to_string();
        }
    }
    if let Some(value) = header_str(headers, "x-forwarded-for")
        && let Some(client) = value.split(',').next()
    {
        return client.trim().to_string();
    }
    if let Some(value) = header_str(headers, "x-real-ip") {
        return value.to_string();
    }
    remote_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Browser family and version from the User-Agent string. The token order
/// matters: Edge and Opera embed "Chrome", Chrome embeds "Safari".
fn detect_browser(ua: &str) -> (&'static str, String) {
    let lower = ua.to_lowercase();
    if lower.contains("edg/") || lower.contains("edge/") {
        ("Edge", version_after(&lower, &["edg/", "edge/"]))
    } else if lower.contains("opr/") || lower.contains("opera") {
        ("Opera", version_after(&lower, &["opr/"]))
    } else if lower.contains("chrome/") {
        ("Chrome", version_after(&lower, &["chrome/"]))
    } else if lower.contains("safari/") {
        ("Safari", version_after(&lower, &["version/"]))
    } else if lower.contains("firefox/") {
        ("Firefox", version_after(&lower, &["firefox/"]))
    } else if lower.contains("msie") || lower.contains("trident/") {
        ("Internet Explorer", String::new())
    } else {
        ("Unknown Browser", String::new())
    }
}

fn version_after(lower: &str, tokens: &[&str]) -> String {
    for token in tokens {
        if let Some(at) = lower.find(token) {
            let rest = &lower[at + token.len()..];
            let version: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if !version.is_empty() {
                return version;
            }
        }
    }
    String::new()
}

fn detect_os(ua: &str) -> &'static str {
    let lower = ua.to_lowercase();
    if lower.contains("windows") {
        "Windows"
    } else if lower.contains("iphone") {
        "iOS"
    } else if lower.contains("ipad") {
        "iPadOS"
    } else if lower.contains("mac os x") || lower.contains("macintosh") {
        "macOS"
    } else if lower.contains("android") {
        "Android"
    } else if lower.contains("cros") {
        "Chrome OS"
    } else if lower.contains("linux") {
        "Linux"
    } else {
        "Unknown OS"
    }
}

fn detect_platform(ua: &str) -> &'static str {
    let lower = ua.to_lowercase();
    if lower.contains("ipad") || lower.contains("tablet") {
        "tablet"
    } else if lower.contains("mobile") || lower.contains("iphone") || lower.contains("android") {
        "mobile"
    } else if lower.contains("windows")
        || lower.contains("macintosh")
        || lower.contains("linux")
        || lower.contains("cros")
    {
        "desktop"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.114 Safari/537.36";
    const FIREFOX_WIN: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1";

    #[test]
    fn test_detect_browser() {
        assert_eq!(detect_browser(CHROME_MAC), ("Chrome", "91.0.4472.114".into()));
        assert_eq!(detect_browser(FIREFOX_WIN), ("Firefox", "121.0".into()));
        assert_eq!(detect_browser(SAFARI_IPHONE).0, "Safari");
        assert_eq!(detect_browser("curl/8.0").0, "Unknown Browser");
    }

    #[test]
    fn test_detect_os_and_platform() {
        assert_eq!(detect_os(CHROME_MAC), "macOS");
        assert_eq!(detect_platform(CHROME_MAC), "desktop");
        assert_eq!(detect_os(FIREFOX_WIN), "Windows");
        assert_eq!(detect_os(SAFARI_IPHONE), "iOS");
        assert_eq!(detect_platform(SAFARI_IPHONE), "mobile");
    }

    #[test]
    fn test_client_ip_header_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, None), "198.51.100.9");

        headers.insert("forwarded", "for=203.0.113.7;proto=https".parse().unwrap());
        assert_eq!(client_ip(&headers, None), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_fallback_to_remote_addr() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "192.0.2.4:51000".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(addr)), "192.0.2.4");
        assert_eq!(client_ip(&headers, None), "unknown");
    }

    #[test]
    fn test_request_meta_with_resolver() {
        struct FixedGeo;
        impl GeoResolver for FixedGeo {
            fn country(&self, _ip: &str) -> Option<String> {
                Some("Japan".to_string())
            }
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, CHROME_MAC.parse().unwrap());
        headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());

        let meta = request_meta(&headers, None, &FixedGeo);
        assert_eq!(meta.browser, "Chrome");
        assert_eq!(meta.os, "macOS");
        assert_eq!(meta.platform, "desktop");
        assert_eq!(meta.ip, "203.0.113.7");
        assert_eq!(meta.country, "Japan");
    }
}
