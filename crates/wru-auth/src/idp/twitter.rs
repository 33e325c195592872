//! Twitter OAuth1a provider.
//!
//! Twitter still speaks the three-legged OAuth 1.0a flow: obtain a request
//! token, send the browser to the authorize page, then trade the verifier
//! for access credentials. Every API call carries an HMAC-SHA1 signed
//! `Authorization: OAuth` header.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use crate::AuthResult;
use crate::error::AuthError;
use crate::idp::{CallbackValues, IdentityProvider, LoginBegin, LoginCompletion};
use crate::register::ProviderKind;
use crate::session::token::generate_token;

const REQUEST_TOKEN_URL: &str = "https://api.twitter.com/oauth/request_token";
const AUTHORIZE_URL: &str = "https://api.twitter.com/oauth/authorize";
const ACCESS_TOKEN_URL: &str = "https://api.twitter.com/oauth/access_token";
const VERIFY_CREDENTIALS_URL: &str =
    "https://api.twitter.com/1.1/account/verify_credentials.json";

type HmacSha1 = Hmac<Sha1>;

/// Twitter consumer credentials.
#[derive(Debug, Clone, Default)]
pub struct TwitterConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
}

impl TwitterConfig {
    /// Returns `true` when both credentials are present.
    #[must_use]
    pub fn available(&self) -> bool {
        !self.consumer_key.is_empty() && !self.consumer_secret.is_empty()
    }
}

/// OAuth1a login against api.twitter.com. The external id is the account's
/// screen name.
pub struct TwitterProvider {
    config: TwitterConfig,
    callback_url: String,
    request_token_url: String,
    authorize_url: String,
    access_token_url: String,
    verify_credentials_url: String,
    http: reqwest::Client,
}

impl TwitterProvider {
    /// Creates a provider; `host` is this proxy's public origin.
    #[must_use]
    pub fn new(config: TwitterConfig, host: &str, http: reqwest::Client) -> Self {
        Self {
            config,
            callback_url: format!("{}/.wru/callback", host.trim_end_matches('/')),
            request_token_url: REQUEST_TOKEN_URL.to_string(),
            authorize_url: AUTHORIZE_URL.to_string(),
            access_token_url: ACCESS_TOKEN_URL.to_string(),
            verify_credentials_url: VERIFY_CREDENTIALS_URL.to_string(),
            http,
        }
    }

    /// Overrides the Twitter endpoints (tests).
    #[must_use]
    pub fn with_endpoints(
        mut self,
        request_token_url: impl Into<String>,
        authorize_url: impl Into<String>,
        access_token_url: impl Into<String>,
        verify_credentials_url: impl Into<String>,
    ) -> Self {
        self.request_token_url = request_token_url.into();
        self.authorize_url = authorize_url.into();
        self.access_token_url = access_token_url.into();
        self.verify_credentials_url = verify_credentials_url.into();
        self
    }

    /// Builds the signed `Authorization: OAuth` header for one request.
    fn authorization_header(
        &self,
        method: &str,
        url: &str,
        extra: &[(&str, &str)],
        token: Option<(&str, &str)>,
    ) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();
        let nonce = generate_token();

        let mut oauth_params: Vec<(String, String)> = vec![
            ("oauth_consumer_key".into(), self.config.consumer_key.clone()),
            ("oauth_nonce".into(), nonce),
            ("oauth_signature_method".into(), "HMAC-SHA1".into()),
            ("oauth_timestamp".into(), timestamp),
            ("oauth_version".into(), "1.0".into()),
        ];
        if let Some((key, _)) = token {
            oauth_params.push(("oauth_token".into(), key.to_string()));
        }

        // Signature base covers the oauth params plus the request params.
        let mut all: Vec<(String, String)> = oauth_params.clone();
        all.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        all.sort();
        let param_string = all
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let base = format!(
            "{}&{}&{}",
            method,
            percent_encode(url),
            percent_encode(&param_string)
        );
        let signing_key = format!(
            "{}&{}",
            percent_encode(&self.config.consumer_secret),
            percent_encode(token.map(|(_, secret)| secret).unwrap_or(""))
        );

        let mut mac =
            HmacSha1::new_from_slice(signing_key.as_bytes()).expect("hmac accepts any key size");
        mac.update(base.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        oauth_params.push(("oauth_signature".into(), signature));
        oauth_params.sort();
        let fields = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {fields}")
    }

    /// Signed POST returning the form-encoded body.
    async fn signed_post(
        &self,
        url: &str,
        extra: &[(&str, &str)],
        token: Option<(&str, &str)>,
    ) -> AuthResult<HashMap<String, String>> {
        let header = self.authorization_header("POST", url, extra, token);
        let response = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, header)
            .form(extra)
            .send()
            .await
            .map_err(|e| twitter_error(format!("{url}: {e}")))?
            .error_for_status()
            .map_err(|e| twitter_error(format!("{url}: {e}")))?;
        let body = response
            .text()
            .await
            .map_err(|e| twitter_error(format!("{url}: {e}")))?;
        Ok(url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect())
    }
}

fn twitter_error(message: impl Into<String>) -> AuthError {
    AuthError::identity_provider("twitter", message)
}

/// RFC 3986 percent encoding with the OAuth unreserved set.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct TwitterAccount {
    screen_name: String,
}

#[async_trait]
impl IdentityProvider for TwitterProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Twitter
    }

    async fn begin(&self) -> AuthResult<LoginBegin> {
        let body = self
            .signed_post(
                &self.request_token_url,
                &[("oauth_callback", self.callback_url.as_str())],
                None,
            )
            .await?;
        let token = body
            .get("oauth_token")
            .ok_or_else(|| twitter_error("request token missing from response"))?;
        let secret = body
            .get("oauth_token_secret")
            .ok_or_else(|| twitter_error("request token secret missing from response"))?;

        Ok(LoginBegin {
            redirect_url: format!("{}?oauth_token={}", self.authorize_url, percent_encode(token)),
            scratch: HashMap::from([
                ("idp".to_string(), "twitter".to_string()),
                ("token-key".to_string(), token.clone()),
                ("token-secret".to_string(), secret.clone()),
            ]),
        })
    }

    async fn complete(
        &self,
        callback: &CallbackValues,
        scratch: &HashMap<String, String>,
    ) -> AuthResult<LoginCompletion> {
        let token_key = scratch
            .get("token-key")
            .ok_or_else(|| twitter_error("handshake state is broken: token-key missing"))?;
        let token_secret = scratch
            .get("token-secret")
            .ok_or_else(|| twitter_error("handshake state is broken: token-secret missing"))?;
        let verifier = callback
            .get("oauth_verifier")
            .ok_or_else(|| twitter_error("oauth_verifier missing from callback"))?;

        let access = self
            .signed_post(
                &self.access_token_url,
                &[("oauth_verifier", verifier.as_str())],
                Some((token_key, token_secret)),
            )
            .await?;
        let access_key = access
            .get("oauth_token")
            .ok_or_else(|| twitter_error("access token missing from response"))?;
        let access_secret = access
            .get("oauth_token_secret")
            .ok_or_else(|| twitter_error("access token secret missing from response"))?;

        let header = self.authorization_header(
            "GET",
            &self.verify_credentials_url,
            &[],
            Some((access_key, access_secret)),
        );
        let account: TwitterAccount = self
            .http
            .get(&self.verify_credentials_url)
            .header(reqwest::header::AUTHORIZATION, header)
            .send()
            .await
            .map_err(|e| twitter_error(format!("verify credentials: {e}")))?
            .error_for_status()
            .map_err(|e| twitter_error(format!("verify credentials: {e}")))?
            .json()
            .await
            .map_err(|e| twitter_error(format!("verify credentials response: {e}")))?;

        Ok(LoginCompletion {
            external_id: account.screen_name,
            info: HashMap::from([("login-idp".to_string(), "twitter".to_string())]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_availability() {
        assert!(!TwitterConfig::default().available());
        assert!(
            TwitterConfig {
                consumer_key: "k".into(),
                consumer_secret: "s".into()
            }
            .available()
        );
    }

    #[test]
    fn test_percent_encode_oauth_set() {
        assert_eq!(percent_encode("abcXYZ019-._~"), "abcXYZ019-._~");
        assert_eq!(percent_encode("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(percent_encode("日"), "%E6%97%A5");
    }

    #[test]
    fn test_authorization_header_shape() {
        let provider = TwitterProvider::new(
            TwitterConfig {
                consumer_key: "ck".into(),
                consumer_secret: "cs".into(),
            },
            "https://proxy.example.com",
            reqwest::Client::new(),
        );
        let header = provider.authorization_header(
            "POST",
            "https://api.twitter.com/oauth/request_token",
            &[("oauth_callback", "https://proxy.example.com/.wru/callback")],
            None,
        );

        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_consumer_key=\"ck\""));
        assert!(header.contains("oauth_signature_method=\"HMAC-SHA1\""));
        assert!(header.contains("oauth_signature=\""));
        assert!(!header.contains("oauth_token=\""));
    }

    #[tokio::test]
    async fn test_complete_requires_scratch_secrets() {
        let provider = TwitterProvider::new(
            TwitterConfig::default(),
            "https://proxy.example.com",
            reqwest::Client::new(),
        );
        let callback =
            HashMap::from([("oauth_verifier".to_string(), "v".to_string())]);

        let err = provider.complete(&callback, &HashMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("token-key missing"));
    }
}
