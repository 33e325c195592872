//! OpenID Connect provider.
//!
//! The provider is configured with an issuer URL; the discovery document and
//! the signing keys are fetched once at startup. Login follows the
//! authorization-code flow and the callback completes by verifying the
//! returned id-token: signature against the provider JWKS, audience against
//! the configured client id, and nonce against the handshake scratch state.

use std::collections::HashMap;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;
use crate::idp::{CallbackValues, IdentityProvider, LoginBegin, LoginCompletion};
use crate::register::ProviderKind;
use crate::session::token::generate_token;

/// OIDC client credentials and issuer location.
#[derive(Debug, Clone, Default)]
pub struct OidcConfig {
    pub provider_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl OidcConfig {
    /// Returns `true` when issuer and both credentials are present.
    #[must_use]
    pub fn available(&self) -> bool {
        !self.provider_url.is_empty() && !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

/// The subset of the OIDC discovery document this provider consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcDiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// One signing key from the provider's JWKS.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

/// The provider's published key set.
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Picks the RSA key for `kid`, falling back to the only RSA key when the
    /// token header carries none.
    fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        let rsa = self.keys.iter().filter(|k| k.kty == "RSA");
        match kid {
            Some(kid) => rsa.clone().find(|k| k.kid.as_deref() == Some(kid)),
            None => rsa.clone().next(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    nonce: Option<String>,
}

fn oidc_error(message: impl Into<String>) -> AuthError {
    AuthError::identity_provider("oidc", message)
}

/// Authorization-code login against a discovered OIDC issuer. The external
/// id is the `email` claim, falling back to `sub`.
pub struct OidcProvider {
    config: OidcConfig,
    callback_url: String,
    discovery: OidcDiscoveryDocument,
    jwks: JwkSet,
    http: reqwest::Client,
}

impl OidcProvider {
    /// Fetches the issuer's discovery document and key set and builds the
    /// provider. Called once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IdentityProvider`] when discovery or the JWKS
    /// fetch fails.
    pub async fn discover(
        config: OidcConfig,
        host: &str,
        http: reqwest::Client,
    ) -> AuthResult<Self> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            config.provider_url.trim_end_matches('/')
        );
        let discovery: OidcDiscoveryDocument = http
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| oidc_error(format!("discovery: {e}")))?
            .error_for_status()
            .map_err(|e| oidc_error(format!("discovery: {e}")))?
            .json()
            .await
            .map_err(|e| oidc_error(format!("discovery document: {e}")))?;

        let jwks: JwkSet = http
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|e| oidc_error(format!("jwks: {e}")))?
            .error_for_status()
            .map_err(|e| oidc_error(format!("jwks: {e}")))?
            .json()
            .await
            .map_err(|e| oidc_error(format!("jwks document: {e}")))?;

        Ok(Self {
            config,
            callback_url: format!("{}/.wru/callback", host.trim_end_matches('/')),
            discovery,
            jwks,
            http,
        })
    }

    /// Builds a provider from an already-fetched discovery document and key
    /// set (tests).
    #[must_use]
    pub fn from_parts(
        config: OidcConfig,
        host: &str,
        discovery: OidcDiscoveryDocument,
        jwks: JwkSet,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            callback_url: format!("{}/.wru/callback", host.trim_end_matches('/')),
            discovery,
            jwks,
            http,
        }
    }

    /// Verifies the id-token and extracts the external id.
    fn verify_id_token(
        &self,
        raw: &str,
        scratch: &HashMap<String, String>,
    ) -> AuthResult<String> {
        let header =
            decode_header(raw).map_err(|e| oidc_error(format!("id token header: {e}")))?;
        let jwk = self
            .jwks
            .find(header.kid.as_deref())
            .ok_or_else(|| oidc_error("no matching signing key in jwks"))?;
        let (n, e) = match (&jwk.n, &jwk.e) {
            (Some(n), Some(e)) => (n, e),
            _ => return Err(oidc_error("signing key is not an rsa key")),
        };
        let key = DecodingKey::from_rsa_components(n, e)
            .map_err(|e| oidc_error(format!("signing key: {e}")))?;

        let algorithm = jwk
            .alg
            .as_deref()
            .and_then(|alg| alg.parse::<Algorithm>().ok())
            .unwrap_or(Algorithm::RS256);
        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[&self.config.client_id]);
        validation.set_issuer(&[&self.discovery.issuer]);

        let token = decode::<IdTokenClaims>(raw, &key, &validation)
            .map_err(|e| oidc_error(format!("id token verify error: {e}")))?;

        // The nonce travelled out via the authorize URL and must come back
        // inside the signed token.
        if let Some(expected) = scratch.get("nonce")
            && token.claims.nonce.as_deref() != Some(expected.as_str())
        {
            return Err(oidc_error("nonce mismatch"));
        }

        Ok(token.claims.email.unwrap_or(token.claims.sub))
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Oidc
    }

    async fn begin(&self) -> AuthResult<LoginBegin> {
        let state = generate_token();
        let nonce = generate_token();
        let redirect_url = Url::parse_with_params(
            &self.discovery.authorization_endpoint,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.callback_url.as_str()),
                ("scope", "openid email"),
                ("state", state.as_str()),
                ("nonce", nonce.as_str()),
            ],
        )
        .map_err(|e| oidc_error(format!("authorize url: {e}")))?;

        Ok(LoginBegin {
            redirect_url: redirect_url.into(),
            scratch: HashMap::from([
                ("idp".to_string(), "oidc".to_string()),
                ("state".to_string(), state),
                ("nonce".to_string(), nonce),
            ]),
        })
    }

    async fn complete(
        &self,
        callback: &CallbackValues,
        scratch: &HashMap<String, String>,
    ) -> AuthResult<LoginCompletion> {
        let code = callback
            .get("code")
            .ok_or_else(|| oidc_error("code is missing from callback"))?;

        let token: TokenResponse = self
            .http
            .post(&self.discovery.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", self.callback_url.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| oidc_error(format!("code exchange: {e}")))?
            .error_for_status()
            .map_err(|e| oidc_error(format!("code exchange: {e}")))?
            .json()
            .await
            .map_err(|e| oidc_error(format!("token response: {e}")))?;

        let raw_id_token = token
            .id_token
            .ok_or_else(|| oidc_error("id token missing from token response"))?;
        let external_id = self.verify_id_token(&raw_id_token, scratch)?;

        Ok(LoginCompletion {
            external_id,
            info: HashMap::from([("login-idp".to_string(), "oidc".to_string())]),
        })
    }
}
