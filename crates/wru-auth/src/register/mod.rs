//! The identity register.
//!
//! A read-mostly directory of users, indexed by internal user id and by
//! `(provider, external account)` pairs. The register is backed by an
//! external source of truth (environment variables for development, a CSV
//! table for deployments) and can be hot-reloaded in the background; readers
//! never observe a half-populated index because reloads build a fresh index
//! off-lock and swap it in under the write lock.

pub mod csv;
pub mod reload;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;

/// The closed set of federated identity platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    Twitter,
    GitHub,
    #[serde(rename = "OIDC")]
    Oidc,
    Debug,
}

impl ProviderKind {
    /// The URL path tag for this provider (`/.wru/login/{tag}`).
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Twitter => "twitter",
            Self::GitHub => "github",
            Self::Oidc => "oidc",
            Self::Debug => "debug",
        }
    }

    /// Resolves a URL path tag back to a provider.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "twitter" => Some(Self::Twitter),
            "github" => Some(Self::GitHub),
            "oidc" => Some(Self::Oidc),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Twitter => "Twitter",
            Self::GitHub => "GitHub",
            Self::Oidc => "OIDC",
            Self::Debug => "Debug",
        };
        write!(f, "{name}")
    }
}

/// A user's account at an external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedAccount {
    /// The platform the account lives on.
    #[serde(rename = "service")]
    pub provider: ProviderKind,
    /// The external account id (screen name, login, or OIDC subject/email).
    pub account: String,
}

/// One user in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    pub organization: String,
    pub scopes: Vec<String>,
    pub federated_accounts: Vec<FederatedAccount>,
}

impl UserRecord {
    /// The scope list joined for display.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(", ")
    }
}

#[derive(Default)]
struct RegisterIndex {
    by_id: HashMap<String, Arc<UserRecord>>,
    by_federated: HashMap<(ProviderKind, String), Arc<UserRecord>>,
}

impl RegisterIndex {
    fn append(&mut self, user: UserRecord) {
        let user = Arc::new(user);
        for account in &user.federated_accounts {
            self.by_federated
                .insert((account.provider, account.account.clone()), user.clone());
        }
        self.by_id.insert(user.user_id.clone(), user);
    }
}

/// Directory of known users with their federated accounts.
#[derive(Default)]
pub struct IdentityRegister {
    index: RwLock<RegisterIndex>,
}

impl IdentityRegister {
    /// Creates an empty register.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a register pre-populated with `users`.
    #[must_use]
    pub fn from_users(users: Vec<UserRecord>) -> Self {
        let register = Self::new();
        register.replace_all(users);
        register
    }

    /// Adds or overwrites a single user.
    pub fn append_user(&self, user: UserRecord) {
        let mut index = self.index.write().expect("register lock poisoned");
        index.append(user);
    }

    /// Atomically replaces the whole directory. Used by hot reload.
    pub fn replace_all(&self, users: Vec<UserRecord>) {
        let mut fresh = RegisterIndex::default();
        for user in users {
            fresh.append(user);
        }
        let mut index = self.index.write().expect("register lock poisoned");
        *index = fresh;
    }

    /// Looks a user up by internal id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UserNotFound`] when no user has this id.
    pub fn find_by_id(&self, user_id: &str) -> AuthResult<Arc<UserRecord>> {
        let index = self.index.read().expect("register lock poisoned");
        index
            .by_id
            .get(user_id)
            .cloned()
            .ok_or_else(|| AuthError::user_not_found(user_id))
    }

    /// Looks a user up by federated account.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UserNotFound`] when no user owns this account.
    pub fn find_by_federated(
        &self,
        provider: ProviderKind,
        external_id: &str,
    ) -> AuthResult<Arc<UserRecord>> {
        let index = self.index.read().expect("register lock poisoned");
        index
            .by_federated
            .get(&(provider, external_id.to_string()))
            .cloned()
            .ok_or_else(|| AuthError::user_not_found(format!("{external_id} of {provider}")))
    }

    /// All users, ordered by user id. Powers the dev-mode login form.
    #[must_use]
    pub fn all_users(&self) -> Vec<Arc<UserRecord>> {
        let index = self.index.read().expect("register lock poisoned");
        let mut users: Vec<Arc<UserRecord>> = index.by_id.values().cloned().collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().expect("register lock poisoned").by_id.len()
    }

    /// Returns `true` when no users are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn user_env_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^WRU_USER_\d+$").expect("user env pattern compiles"))
}

/// Parses dev users from environment variables.
///
/// Variables named `WRU_USER_<n>` hold comma-separated `key:value` fragments
/// (`id:u1,name:User One,scope:admin,github:octocat`). Problems are collected
/// as warnings; a fragment set without an id is skipped.
pub fn parse_env_users<I>(vars: I) -> (Vec<UserRecord>, Vec<String>)
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut users = Vec::new();
    let mut warnings = Vec::new();

    for (key, value) in vars {
        if !user_env_re().is_match(&key) {
            continue;
        }
        match parse_user_fields(&value, &mut warnings) {
            Some(user) => users.push(user),
            None => warnings.push(format!("{key} has no user id, skipped")),
        }
    }
    users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    (users, warnings)
}

fn parse_user_fields(src: &str, warnings: &mut Vec<String>) -> Option<UserRecord> {
    let mut user = UserRecord {
        user_id: String::new(),
        display_name: String::new(),
        email: String::new(),
        organization: String::new(),
        scopes: Vec::new(),
        federated_accounts: Vec::new(),
    };

    for fragment in src.split(',') {
        let Some((key, value)) = fragment.split_once(':') else {
            if !fragment.trim().is_empty() {
                warnings.push(format!("user field without value: {fragment}"));
            }
            continue;
        };
        match key.trim() {
            "id" | "userid" => user.user_id = value.to_string(),
            "name" => user.display_name = value.to_string(),
            "mail" | "email" => user.email = value.to_string(),
            "org" | "organization" => user.organization = value.to_string(),
            "scope" => user.scopes.push(value.to_string()),
            "twitter" => user.federated_accounts.push(FederatedAccount {
                provider: ProviderKind::Twitter,
                account: value.to_string(),
            }),
            "github" => user.federated_accounts.push(FederatedAccount {
                provider: ProviderKind::GitHub,
                account: value.to_string(),
            }),
            "oidc" => user.federated_accounts.push(FederatedAccount {
                provider: ProviderKind::Oidc,
                account: value.to_string(),
            }),
            other => warnings.push(format!("unknown user field: {other}")),
        }
    }

    if user.user_id.is_empty() {
        return None;
    }
    Some(user)
}
