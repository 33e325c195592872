//! Session data model.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AuthError;

/// Derived lifecycle status of a session.
///
/// Status is never stored; it is a pure function of the session timestamps,
/// the current time, and the configured timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// The handshake has not completed; `user_id` is still empty.
    #[default]
    BeforeLogin,
    /// Logged in and inside both timeout windows.
    Active,
    /// Logged in but idle for longer than the idle timeout. The session can
    /// be revived through `renew`.
    IdleTimeout,
}

/// One session per browser/device, keyed by the opaque cookie token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleSession {
    /// Opaque URL-safe token; rotated on every phase transition.
    pub id: String,

    /// Owning user id; empty until login completes.
    #[serde(default)]
    pub user_id: String,

    /// When the session record was minted.
    #[serde(with = "time::serde::rfc3339")]
    pub login_at: OffsetDateTime,

    /// Last time traffic was seen on this session.
    #[serde(with = "time::serde::rfc3339")]
    pub last_access_at: OffsetDateTime,

    /// Handshake scratch state before login, device metadata after.
    #[serde(default)]
    pub login_info: HashMap<String, String>,
}

impl SingleSession {
    fn info(&self, key: &str) -> &str {
        self.login_info.get(key).map_or("", String::as_str)
    }

    /// Browser family recorded at login.
    #[must_use]
    pub fn browser(&self) -> &str {
        self.info("browser")
    }

    /// Operating system recorded at login.
    #[must_use]
    pub fn os(&self) -> &str {
        self.info("os")
    }

    /// The identity provider that completed the login.
    #[must_use]
    pub fn idp(&self) -> &str {
        self.info("login-idp")
    }

    /// Human-readable login location, `country(ip)`.
    #[must_use]
    pub fn location(&self) -> String {
        format!("{}({})", self.info("country"), self.info("ip"))
    }
}

/// One record per logged-in user, aggregating all device sessions and the
/// backend-writable data bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    /// The user id.
    pub id: String,

    /// Ids of the user's live `SingleSession`s.
    #[serde(default)]
    pub sessions: Vec<String>,

    /// Session data mutated by backends through directives.
    #[serde(default)]
    pub data: HashMap<String, String>,

    // Profile cache, refreshed from the identity register on login.
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Nanoseconds-since-epoch timestamp encoding for the backend session header.
mod unix_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(t: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(t.unix_timestamp_nanos() as i64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<OffsetDateTime, D::Error> {
        let nanos = i64::deserialize(d)?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
            .map_err(serde::de::Error::custom)
    }
}

/// Snapshot handed to request handlers and serialized into the
/// server-session header for backends.
///
/// Mutations requested by handlers are queued as [`Directive`]s and flushed
/// to the store by the request pipeline after the handler returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(with = "unix_nanos")]
    pub login_at: OffsetDateTime,
    #[serde(with = "unix_nanos")]
    pub expire_at: OffsetDateTime,
    #[serde(with = "unix_nanos")]
    pub last_access_at: OffsetDateTime,

    #[serde(rename = "id")]
    pub user_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    pub email: String,
    #[serde(rename = "org")]
    pub organization: String,
    pub scopes: Vec<String>,
    pub data: HashMap<String, String>,

    #[serde(skip)]
    pub status: SessionStatus,
    #[serde(skip)]
    pending: Vec<Directive>,
}

impl Session {
    /// Builds a snapshot for a pre-login session. The data bag exposes the
    /// handshake scratch state.
    #[must_use]
    pub fn before_login(single: &SingleSession, expire_at: OffsetDateTime) -> Self {
        Self {
            login_at: single.login_at,
            expire_at,
            last_access_at: single.last_access_at,
            user_id: String::new(),
            display_name: String::new(),
            email: String::new(),
            organization: String::new(),
            scopes: Vec::new(),
            data: single.login_info.clone(),
            status: SessionStatus::BeforeLogin,
            pending: Vec::new(),
        }
    }

    /// Builds a snapshot for a promoted session.
    #[must_use]
    pub fn logged_in(
        single: &SingleSession,
        user: &UserSession,
        status: SessionStatus,
        expire_at: OffsetDateTime,
    ) -> Self {
        Self {
            login_at: single.login_at,
            expire_at,
            last_access_at: single.last_access_at,
            user_id: single.user_id.clone(),
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            organization: user.organization.clone(),
            scopes: user.scopes.clone(),
            data: user.data.clone(),
            status,
            pending: Vec::new(),
        }
    }

    /// Queues an upsert of `key` in the user's session data.
    pub fn add_session_data(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pending.push(Directive {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Queues a deletion of `key` from the user's session data.
    pub fn remove_session_data(&mut self, key: impl Into<String>) {
        self.pending.push(Directive {
            key: key.into(),
            value: String::new(),
        });
    }

    /// Returns the queued directives without draining them.
    #[must_use]
    pub fn pending_directives(&self) -> &[Directive] {
        &self.pending
    }

    /// Drains the queued directives for flushing.
    pub fn take_directives(&mut self) -> Vec<Directive> {
        std::mem::take(&mut self.pending)
    }

    /// Returns `true` if all `required` scopes are present.
    #[must_use]
    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.scopes.contains(s))
    }
}

/// A backend-emitted instruction to set or delete a session data key.
///
/// An empty value deletes the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub key: String,
    pub value: String,
}

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*(\S+)\s*=\s*(.*)").expect("directive pattern compiles"))
}

/// Parses a `key=value` directive. Surrounding whitespace is ignored and an
/// empty right-hand side means delete.
///
/// # Errors
///
/// Returns [`AuthError::InvalidDirective`] when `src` has no `key=` shape.
pub fn parse_directive(src: &str) -> Result<Directive, AuthError> {
    let caps = directive_re()
        .captures(src)
        .ok_or_else(|| AuthError::invalid_directive(src))?;
    Ok(Directive {
        key: caps[1].to_string(),
        value: caps[2].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample_single() -> SingleSession {
        SingleSession {
            id: "tok".into(),
            user_id: "u1".into(),
            login_at: datetime!(2021-07-02 10:00:00 UTC),
            last_access_at: datetime!(2021-07-02 10:00:00 UTC),
            login_info: HashMap::from([
                ("browser".to_string(), "Chrome".to_string()),
                ("os".to_string(), "macOS".to_string()),
                ("country".to_string(), "Japan".to_string()),
                ("ip".to_string(), "203.0.113.7".to_string()),
                ("login-idp".to_string(), "github".to_string()),
            ]),
        }
    }

    #[test]
    fn test_single_session_accessors() {
        let s = sample_single();
        assert_eq!(s.browser(), "Chrome");
        assert_eq!(s.os(), "macOS");
        assert_eq!(s.idp(), "github");
        assert_eq!(s.location(), "Japan(203.0.113.7)");
    }

    #[test]
    fn test_parse_directive() {
        let d = parse_directive("key=value").unwrap();
        assert_eq!(d, Directive { key: "key".into(), value: "value".into() });

        let d = parse_directive("  access-count = 12 ").unwrap();
        assert_eq!(d.key, "access-count");
        assert_eq!(d.value, "12 ");

        let d = parse_directive("key=").unwrap();
        assert_eq!(d.value, "");

        assert!(parse_directive("no-equals-here").is_err());
    }

    #[test]
    fn test_session_wire_format() {
        let single = sample_single();
        let user = UserSession {
            id: "u1".into(),
            sessions: vec!["tok".into()],
            data: HashMap::from([("k".to_string(), "v".to_string())]),
            display_name: "User One".into(),
            email: "u1@example.com".into(),
            organization: "R&D".into(),
            scopes: vec!["login".into(), "admin".into()],
        };
        let ses = Session::logged_in(
            &single,
            &user,
            SessionStatus::Active,
            datetime!(2021-08-01 10:00:00 UTC),
        );

        let wire: serde_json::Value = serde_json::to_value(&ses).unwrap();
        assert_eq!(wire["id"], "u1");
        assert_eq!(wire["name"], "User One");
        assert_eq!(wire["org"], "R&D");
        assert_eq!(wire["data"]["k"], "v");
        // nanoseconds since epoch
        assert_eq!(wire["login_at"], 1_625_220_000_000_000_000i64);
        assert!(wire.get("status").is_none());
    }

    #[test]
    fn test_session_directive_queue() {
        let single = sample_single();
        let user = UserSession {
            id: "u1".into(),
            sessions: vec![],
            data: HashMap::new(),
            display_name: String::new(),
            email: String::new(),
            organization: String::new(),
            scopes: vec![],
        };
        let mut ses = Session::logged_in(
            &single,
            &user,
            SessionStatus::Active,
            datetime!(2021-08-01 10:00:00 UTC),
        );

        ses.add_session_data("theme", "dark");
        ses.remove_session_data("stale");
        assert_eq!(ses.pending_directives().len(), 2);

        let drained = ses.take_directives();
        assert_eq!(drained[0].key, "theme");
        assert_eq!(drained[1].value, "");
        assert!(ses.pending_directives().is_empty());
    }

    #[test]
    fn test_has_scopes() {
        let mut ses = Session::before_login(
            &sample_single(),
            datetime!(2021-07-02 10:10:00 UTC),
        );
        ses.scopes = vec!["login".into(), "admin".into()];
        assert!(ses.has_scopes(&[]));
        assert!(ses.has_scopes(&["login".to_string()]));
        assert!(!ses.has_scopes(&["login".to_string(), "billing".to_string()]));
    }
}
