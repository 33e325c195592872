//! Server configuration from environment variables.

use std::sync::OnceLock;

use regex::Regex;
use time::Duration;
use tracing::info;
use url::Url;
use wru_auth::SessionTimeouts;
use wru_auth::idp::{GitHubConfig, OidcConfig, TwitterConfig};

/// Errors raised while reading the configuration. Fatal at startup only.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is absent.
    #[error("environment variable {name} is required")]
    MissingVar {
        /// The variable name.
        name: &'static str,
    },

    /// A variable is present but unparsable.
    #[error("invalid value for {name}: {message}")]
    Invalid {
        /// The variable name.
        name: &'static str,
        /// What went wrong.
        message: String,
    },
}

impl ConfigError {
    fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            message: message.into(),
        }
    }
}

/// How the session cookie is exposed to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieMode {
    /// HttpOnly cookie; scripts cannot read it.
    Cookie,
    /// Script-readable cookie for JS single-page apps.
    CookieWithJs,
}

/// One forward table entry.
#[derive(Debug, Clone)]
pub struct Route {
    /// Path prefix owned by this backend.
    pub path: String,
    /// Upstream origin requests are rewritten to.
    pub upstream: Url,
    /// Scopes a user must hold to reach this backend.
    pub scopes: Vec<String>,
}

/// Returns the first route whose path prefix matches; the table order wins.
#[must_use]
pub fn match_route<'a>(routes: &'a [Route], path: &str) -> Option<&'a Route> {
    routes.iter().find(|route| path.starts_with(&route.path))
}

/// Full server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub dev_mode: bool,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub forward_to: Vec<Route>,
    pub default_landing_page: String,
    pub session_storage: String,
    pub server_session_header: String,
    pub cookie_name: String,
    pub cookie_mode: CookieMode,
    pub user_table: Option<String>,
    pub user_table_reload: Option<std::time::Duration>,
    pub timeouts: SessionTimeouts,
    pub twitter: TwitterConfig,
    pub github: GitHubConfig,
    pub oidc: OidcConfig,
    pub geoip_database: Option<String>,
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup` (tests inject their own
    /// environment this way).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").ok_or(ConfigError::MissingVar { name: "HOST" })?;
        let forward_spec =
            lookup("WRU_FORWARD_TO").ok_or(ConfigError::MissingVar { name: "WRU_FORWARD_TO" })?;

        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| ConfigError::invalid("PORT", e.to_string()))?,
            None => 3000,
        };
        let dev_mode = match lookup("WRU_DEV_MODE") {
            Some(raw) => raw
                .parse::<bool>()
                .map_err(|e| ConfigError::invalid("WRU_DEV_MODE", e.to_string()))?,
            None => true,
        };

        let (cookie_name, cookie_mode) = parse_client_session_field(
            &lookup("WRU_CLIENT_SESSION_ID_COOKIE").unwrap_or_else(|| "WRU_SESSION@cookie".into()),
        )?;

        let timeouts = SessionTimeouts {
            login: lookup_duration(&lookup, "WRU_LOGIN_TIMEOUT_TERM", Duration::minutes(10))?,
            idle: lookup_duration(&lookup, "WRU_SESSION_IDLE_TIMEOUT_TERM", Duration::hours(1))?,
            absolute: lookup_duration(
                &lookup,
                "WRU_SESSION_ABSOLUTE_TIMEOUT_TERM",
                Duration::hours(720),
            )?,
        };

        let user_table_reload = match lookup("WRU_USER_TABLE_RELOAD_TERM") {
            Some(raw) => {
                let term = parse_duration(&raw)
                    .map_err(|e| ConfigError::invalid("WRU_USER_TABLE_RELOAD_TERM", e))?;
                u64::try_from(term.whole_seconds())
                    .ok()
                    .filter(|secs| *secs >= 1)
                    .map(std::time::Duration::from_secs)
            }
            None => None,
        };

        Ok(Self {
            port,
            host,
            dev_mode,
            tls_cert: lookup("WRU_TLS_CERT").filter(|v| !v.is_empty()),
            tls_key: lookup("WRU_TLS_KEY").filter(|v| !v.is_empty()),
            forward_to: parse_forward_table(&forward_spec)?,
            default_landing_page: lookup("WRU_DEFAULT_LANDING_PAGE")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "/".into()),
            session_storage: lookup("WRU_SESSION_STORAGE").unwrap_or_default(),
            server_session_header: lookup("WRU_SERVER_SESSION_FIELD")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "Wru-Session".into()),
            cookie_name,
            cookie_mode,
            user_table: lookup("WRU_USER_TABLE").filter(|v| !v.is_empty()),
            user_table_reload,
            timeouts,
            twitter: TwitterConfig {
                consumer_key: lookup("WRU_TWITTER_CONSUMER_KEY").unwrap_or_default(),
                consumer_secret: lookup("WRU_TWITTER_CONSUMER_SECRET").unwrap_or_default(),
            },
            github: GitHubConfig {
                client_id: lookup("WRU_GITHUB_CLIENT_ID").unwrap_or_default(),
                client_secret: lookup("WRU_GITHUB_CLIENT_SECRET").unwrap_or_default(),
            },
            oidc: OidcConfig {
                provider_url: lookup("WRU_OIDC_PROVIDER_URL").unwrap_or_default(),
                client_id: lookup("WRU_OIDC_CLIENT_ID").unwrap_or_default(),
                client_secret: lookup("WRU_OIDC_CLIENT_SECRET").unwrap_or_default(),
            },
            geoip_database: lookup("WRU_GEOIP_DATABASE").filter(|v| !v.is_empty()),
        })
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the forward table is empty or no
    /// identity provider is configured outside dev mode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forward_to.is_empty() {
            return Err(ConfigError::invalid(
                "WRU_FORWARD_TO",
                "at least one route is required",
            ));
        }
        if !self.dev_mode
            && !self.twitter.available()
            && !self.github.available()
            && !self.oidc.available()
        {
            return Err(ConfigError::invalid(
                "WRU_DEV_MODE",
                "no identity provider is configured and dev mode is off",
            ));
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::invalid(
                "WRU_TLS_CERT",
                "TLS needs both a certificate and a key",
            ));
        }
        Ok(())
    }

    /// `true` when the public host is served over https.
    #[must_use]
    pub fn is_https(&self) -> bool {
        self.host.starts_with("https://")
    }

    /// Logs the effective configuration at startup.
    pub fn summarize(&self) {
        info!(host = %self.host, port = self.port, dev_mode = self.dev_mode, "wru configuration");
        info!(
            tls = self.tls_cert.is_some() && self.tls_key.is_some(),
            cookie = %self.cookie_name,
            session_header = %self.server_session_header,
            "transport"
        );
        for route in &self.forward_to {
            info!(
                path = %route.path,
                upstream = %route.upstream,
                scopes = %route.scopes.join(", "),
                "forward route"
            );
        }
    }
}

fn lookup_duration<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => parse_duration(&raw).map_err(|e| ConfigError::invalid(name, e)),
        None => Ok(default),
    }
}

/// Parses `90s` / `10m` / `1h` / `30d` duration strings; a bare number is
/// seconds.
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration".into());
    }
    let (number, unit) = match src.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => src.split_at(split),
        None => (src, "s"),
    };
    let amount: i64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    match unit.trim() {
        "s" => Ok(Duration::seconds(amount)),
        "m" => Ok(Duration::minutes(amount)),
        "h" => Ok(Duration::hours(amount)),
        "d" => Ok(Duration::days(amount)),
        other => Err(format!("unknown duration unit: {other}")),
    }
}

fn forward_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(/\S*)\s*=>\s*(https?://[^\s(]+)(?:\s*\(([^)]*)\))?\s*$")
            .expect("forward pattern compiles")
    })
}

/// Parses the forward table grammar:
/// `/path => http(s)://host[:port] (scope1, scope2)` entries joined by `;`,
/// the scope list optional.
pub fn parse_forward_table(src: &str) -> Result<Vec<Route>, ConfigError> {
    let mut routes = Vec::new();
    for (position, entry) in src.split(';').enumerate() {
        if entry.trim().is_empty() {
            continue;
        }
        let caps = forward_re().captures(entry).ok_or_else(|| {
            ConfigError::invalid(
                "WRU_FORWARD_TO",
                format!("wrong route definition ({position}): {entry}"),
            )
        })?;
        let upstream = Url::parse(&caps[2])
            .map_err(|e| ConfigError::invalid("WRU_FORWARD_TO", e.to_string()))?;
        let scopes = caps
            .get(3)
            .map(|list| {
                list.as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        routes.push(Route {
            path: caps[1].trim().to_string(),
            upstream,
            scopes,
        });
    }
    Ok(routes)
}

/// Parses the client session field grammar: `NAME@cookie`,
/// `NAME@cookie-with-js`, or bare `NAME` (defaults to cookie).
pub fn parse_client_session_field(src: &str) -> Result<(String, CookieMode), ConfigError> {
    match src.split_once('@') {
        None => Ok((src.to_string(), CookieMode::Cookie)),
        Some((name, "cookie")) => Ok((name.to_string(), CookieMode::Cookie)),
        Some((name, "cookie-with-js")) => Ok((name.to_string(), CookieMode::CookieWithJs)),
        Some((_, other)) => Err(ConfigError::invalid(
            "WRU_CLIENT_SESSION_ID_COOKIE",
            format!("unknown client session field type: {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<String, String> {
        HashMap::from([
            ("HOST".to_string(), "https://proxy.example.com".to_string()),
            (
                "WRU_FORWARD_TO".to_string(),
                "/api => http://localhost:8000 (admin, user); / => http://localhost:8001"
                    .to_string(),
            ),
        ])
    }

    fn config_from(env: &HashMap<String, String>) -> ServerConfig {
        ServerConfig::from_lookup(|name| env.get(name).cloned()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&base_env());

        assert_eq!(config.port, 3000);
        assert!(config.dev_mode);
        assert_eq!(config.cookie_name, "WRU_SESSION");
        assert_eq!(config.cookie_mode, CookieMode::Cookie);
        assert_eq!(config.server_session_header, "Wru-Session");
        assert_eq!(config.default_landing_page, "/");
        assert_eq!(config.timeouts.login, Duration::minutes(10));
        assert_eq!(config.timeouts.idle, Duration::hours(1));
        assert_eq!(config.timeouts.absolute, Duration::hours(720));
        assert!(config.is_https());
    }

    #[test]
    fn test_missing_host_is_fatal() {
        let err = ServerConfig::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains("HOST"));
    }

    #[test]
    fn test_forward_table_parse() {
        let routes = parse_forward_table(
            "/api => http://localhost:8000 (admin, user); / => https://app.example.com",
        )
        .unwrap();

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].path, "/api");
        assert_eq!(routes[0].upstream.as_str(), "http://localhost:8000/");
        assert_eq!(routes[0].scopes, vec!["admin", "user"]);
        assert_eq!(routes[1].path, "/");
        assert!(routes[1].scopes.is_empty());
    }

    #[test]
    fn test_forward_table_rejects_garbage() {
        assert!(parse_forward_table("/api -> http://localhost:8000").is_err());
        assert!(parse_forward_table("api => http://localhost:8000").is_err());
        assert!(parse_forward_table("/api => ftp://localhost").is_err());
    }

    #[test]
    fn test_route_matching_is_ordered_first_match() {
        let routes = parse_forward_table(
            "/api/admin => http://localhost:1 (admin); /api => http://localhost:2; / => http://localhost:3",
        )
        .unwrap();

        assert_eq!(
            match_route(&routes, "/api/admin/users").unwrap().path,
            "/api/admin"
        );
        assert_eq!(match_route(&routes, "/api/items").unwrap().path, "/api");
        assert_eq!(match_route(&routes, "/index.html").unwrap().path, "/");

        let no_catch_all = parse_forward_table("/app => http://localhost:1").unwrap();
        assert!(match_route(&no_catch_all, "/other").is_none());
    }

    #[test]
    fn test_client_session_field_grammar() {
        assert_eq!(
            parse_client_session_field("SID").unwrap(),
            ("SID".to_string(), CookieMode::Cookie)
        );
        assert_eq!(
            parse_client_session_field("SID@cookie").unwrap(),
            ("SID".to_string(), CookieMode::Cookie)
        );
        assert_eq!(
            parse_client_session_field("SID@cookie-with-js").unwrap(),
            ("SID".to_string(), CookieMode::CookieWithJs)
        );
        assert!(parse_client_session_field("SID@header").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_duration("10m").unwrap(), Duration::minutes(10));
        assert_eq!(parse_duration("720h").unwrap(), Duration::hours(720));
        assert_eq!(parse_duration("30d").unwrap(), Duration::days(30));
        assert_eq!(parse_duration("45").unwrap(), Duration::seconds(45));
        assert!(parse_duration("10 fortnights").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_timeout_overrides() {
        let mut env = base_env();
        env.insert("WRU_LOGIN_TIMEOUT_TERM".to_string(), "5m".to_string());
        env.insert("WRU_SESSION_IDLE_TIMEOUT_TERM".to_string(), "3h".to_string());
        env.insert(
            "WRU_SESSION_ABSOLUTE_TIMEOUT_TERM".to_string(),
            "30d".to_string(),
        );
        let config = config_from(&env);

        assert_eq!(config.timeouts.login, Duration::minutes(5));
        assert_eq!(config.timeouts.idle, Duration::hours(3));
        assert_eq!(config.timeouts.absolute, Duration::days(30));
    }

    #[test]
    fn test_validate_requires_idp_outside_dev_mode() {
        let mut env = base_env();
        env.insert("WRU_DEV_MODE".to_string(), "false".to_string());
        let config = config_from(&env);
        assert!(config.validate().is_err());

        env.insert("WRU_GITHUB_CLIENT_ID".to_string(), "cid".to_string());
        env.insert("WRU_GITHUB_CLIENT_SECRET".to_string(), "cs".to_string());
        let config = config_from(&env);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_tls_needs_both_halves() {
        let mut env = base_env();
        env.insert("WRU_TLS_CERT".to_string(), "/etc/wru/cert.pem".to_string());
        let config = config_from(&env);
        assert!(config.validate().is_err());

        env.insert("WRU_TLS_KEY".to_string(), "/etc/wru/key.pem".to_string());
        let config = config_from(&env);
        assert!(config.validate().is_ok());
    }
}
