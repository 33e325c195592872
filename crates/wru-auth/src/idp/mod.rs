//! Identity provider coordination.
//!
//! Each provider implements the two-step [`IdentityProvider`] contract:
//! `begin` yields a redirect URL plus server-held scratch state, `complete`
//! turns the callback into an external account id. The [`IdpRegistry`] owns
//! the configured providers and enforces the handshake-safety contract
//! (state / request-token equality) before a provider ever sees the
//! callback, so a provider cannot forget the check.

pub mod debug;
pub mod github;
pub mod oidc;
pub mod twitter;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::AuthResult;
use crate::error::AuthError;
use crate::register::ProviderKind;

pub use debug::DebugProvider;
pub use github::{GitHubConfig, GitHubProvider};
pub use oidc::{OidcConfig, OidcProvider};
pub use twitter::{TwitterConfig, TwitterProvider};

/// Form/query values of the provider callback request.
pub type CallbackValues = HashMap<String, String>;

/// Result of starting a handshake.
#[derive(Debug, Clone)]
pub struct LoginBegin {
    /// Where to send the browser.
    pub redirect_url: String,
    /// Server-held scratch state for the pending handshake. Always contains
    /// the `idp` tag; the rest is provider-specific (`state`, `nonce`,
    /// `token-key`, `token-secret`).
    pub scratch: HashMap<String, String>,
}

/// Result of completing a handshake.
#[derive(Debug, Clone)]
pub struct LoginCompletion {
    /// The authenticated account id at the provider.
    pub external_id: String,
    /// Entries merged into the session's login info (`login-idp`).
    pub info: HashMap<String, String>,
}

/// The handshake family a provider speaks, deciding which scratch value the
/// registry checks against the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeProtocol {
    /// Request-token flow; `token-key` must match the callback `oauth_token`.
    OAuth1,
    /// Authorization-code flow; `state` must round-trip.
    OAuth2,
    /// Dev-mode direct trust, no round-trip value.
    Trusted,
}

fn protocol_of(kind: ProviderKind) -> HandshakeProtocol {
    match kind {
        ProviderKind::Twitter => HandshakeProtocol::OAuth1,
        ProviderKind::GitHub | ProviderKind::Oidc => HandshakeProtocol::OAuth2,
        ProviderKind::Debug => HandshakeProtocol::Trusted,
    }
}

/// A pluggable identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Which platform this provider speaks for.
    fn kind(&self) -> ProviderKind;

    /// Starts a handshake.
    async fn begin(&self) -> AuthResult<LoginBegin>;

    /// Completes a handshake from the callback values and the scratch state
    /// saved by [`begin`](Self::begin). The registry has already verified the
    /// round-trip value at this point.
    async fn complete(
        &self,
        callback: &CallbackValues,
        scratch: &HashMap<String, String>,
    ) -> AuthResult<LoginCompletion>;
}

/// Registry of the providers configured at startup.
#[derive(Default)]
pub struct IdpRegistry {
    providers: HashMap<&'static str, Arc<dyn IdentityProvider>>,
}

impl IdpRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under its kind's tag.
    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.providers.insert(provider.kind().tag(), provider);
    }

    /// Returns `true` when a provider is configured for `tag`.
    #[must_use]
    pub fn is_available(&self, tag: &str) -> bool {
        self.providers.contains_key(tag)
    }

    /// Tags of the configured providers, sorted.
    #[must_use]
    pub fn available_tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = self.providers.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Number of configured providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns `true` when no provider is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Starts a handshake with the provider registered under `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IdentityProvider`] when the tag is unknown or the
    /// provider fails to start the handshake.
    pub async fn begin(&self, tag: &str) -> AuthResult<LoginBegin> {
        self.get(tag)?.begin().await
    }

    /// Verifies the handshake round-trip value and completes the login.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IdentityProvider`] when the scratch state is
    /// missing or does not match the callback, or the provider rejects the
    /// exchange.
    pub async fn complete(
        &self,
        tag: &str,
        callback: &CallbackValues,
        scratch: &HashMap<String, String>,
    ) -> AuthResult<LoginCompletion> {
        let provider = self.get(tag)?;
        match protocol_of(provider.kind()) {
            HandshakeProtocol::OAuth2 => {
                check_round_trip(tag, scratch.get("state"), callback.get("state"), "state")?;
            }
            HandshakeProtocol::OAuth1 => {
                check_round_trip(
                    tag,
                    scratch.get("token-key"),
                    callback.get("oauth_token"),
                    "request token",
                )?;
            }
            HandshakeProtocol::Trusted => {}
        }
        provider.complete(callback, scratch).await
    }

    fn get(&self, tag: &str) -> AuthResult<&Arc<dyn IdentityProvider>> {
        self.providers
            .get(tag)
            .ok_or_else(|| AuthError::identity_provider(tag, "provider is not configured"))
    }
}

fn check_round_trip(
    tag: &str,
    held: Option<&String>,
    returned: Option<&String>,
    what: &str,
) -> AuthResult<()> {
    let held = held.ok_or_else(|| {
        AuthError::identity_provider(tag, format!("{what} missing from handshake state"))
    })?;
    if returned != Some(held) {
        return Err(AuthError::identity_provider(tag, format!("{what} mismatch")));
    }
    Ok(())
}
