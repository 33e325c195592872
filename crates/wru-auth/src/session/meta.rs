//! Request metadata captured at login time.

use std::collections::HashMap;

/// Advisory device and network metadata recorded on a promoted session.
///
/// All fields are best-effort strings extracted from the login request; they
/// feed the session list UI and are never used for authorization decisions.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Browser family (e.g. "Chrome").
    pub browser: String,
    /// Browser version.
    pub version: String,
    /// Operating system (e.g. "macOS").
    pub os: String,
    /// Device class (e.g. "desktop", "mobile").
    pub platform: String,
    /// Client IP as seen through proxy headers.
    pub ip: String,
    /// Country resolved from the client IP, if a resolver is configured.
    pub country: String,
}

impl RequestMeta {
    /// Returns the metadata as `login_info` entries for a new session.
    #[must_use]
    pub fn login_info(&self) -> HashMap<String, String> {
        HashMap::from([
            ("browser".to_string(), self.browser.clone()),
            ("version".to_string(), self.version.clone()),
            ("os".to_string(), self.os.clone()),
            ("platform".to_string(), self.platform.clone()),
            ("ip".to_string(), self.ip.clone()),
            ("country".to_string(), self.country.clone()),
        ])
    }
}
