//! GitHub OAuth2 provider.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;
use crate::idp::{CallbackValues, IdentityProvider, LoginBegin, LoginCompletion};
use crate::register::ProviderKind;
use crate::session::token::generate_token;

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_API_URL: &str = "https://api.github.com/user";
const USER_AGENT: &str = "wru-proxy";

/// GitHub OAuth application credentials.
#[derive(Debug, Clone, Default)]
pub struct GitHubConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl GitHubConfig {
    /// Returns `true` when both credentials are present.
    #[must_use]
    pub fn available(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

/// Authorization-code login against github.com. The external id is the
/// account's login name.
pub struct GitHubProvider {
    config: GitHubConfig,
    callback_url: String,
    authorize_url: String,
    token_url: String,
    user_api_url: String,
    http: reqwest::Client,
}

impl GitHubProvider {
    /// Creates a provider; `host` is this proxy's public origin.
    #[must_use]
    pub fn new(config: GitHubConfig, host: &str, http: reqwest::Client) -> Self {
        Self {
            config,
            callback_url: format!("{}/.wru/callback", host.trim_end_matches('/')),
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            user_api_url: USER_API_URL.to_string(),
            http,
        }
    }

    /// Overrides the GitHub endpoints (tests).
    #[must_use]
    pub fn with_endpoints(
        mut self,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
        user_api_url: impl Into<String>,
    ) -> Self {
        self.authorize_url = authorize_url.into();
        self.token_url = token_url.into();
        self.user_api_url = user_api_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GitHubAccount {
    login: String,
}

fn github_error(message: impl Into<String>) -> AuthError {
    AuthError::identity_provider("github", message)
}

#[async_trait]
impl IdentityProvider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn begin(&self) -> AuthResult<LoginBegin> {
        let state = generate_token();
        let redirect_url = Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.callback_url.as_str()),
                ("scope", "user:email"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| github_error(format!("authorize url: {e}")))?;

        Ok(LoginBegin {
            redirect_url: redirect_url.into(),
            scratch: HashMap::from([
                ("idp".to_string(), "github".to_string()),
                ("state".to_string(), state),
            ]),
        })
    }

    async fn complete(
        &self,
        callback: &CallbackValues,
        _scratch: &HashMap<String, String>,
    ) -> AuthResult<LoginCompletion> {
        let code = callback
            .get("code")
            .ok_or_else(|| github_error("code is missing from callback"))?;

        let token: AccessTokenResponse = self
            .http
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code.as_str()),
                ("redirect_uri", self.callback_url.as_str()),
            ])
            .send()
            .await
            .map_err(|e| github_error(format!("code exchange: {e}")))?
            .error_for_status()
            .map_err(|e| github_error(format!("code exchange: {e}")))?
            .json()
            .await
            .map_err(|e| github_error(format!("code exchange response: {e}")))?;

        let account: GitHubAccount = self
            .http
            .get(&self.user_api_url)
            .bearer_auth(&token.access_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| github_error(format!("user lookup: {e}")))?
            .error_for_status()
            .map_err(|e| github_error(format!("user lookup: {e}")))?
            .json()
            .await
            .map_err(|e| github_error(format!("user response: {e}")))?;

        Ok(LoginCompletion {
            external_id: account.login,
            info: HashMap::from([("login-idp".to_string(), "github".to_string())]),
        })
    }
}
