//! Dev-mode identity provider.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::AuthResult;
use crate::error::AuthError;
use crate::idp::{CallbackValues, IdentityProvider, LoginBegin, LoginCompletion};
use crate::register::ProviderKind;

/// Trusts a posted `userid` without any external handshake.
///
/// Only registered when the dev-mode flag is set; never enable this outside
/// local development.
#[derive(Debug, Default)]
pub struct DebugProvider;

impl DebugProvider {
    /// Creates the dev-mode provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IdentityProvider for DebugProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Debug
    }

    async fn begin(&self) -> AuthResult<LoginBegin> {
        Ok(LoginBegin {
            redirect_url: "/.wru/login".to_string(),
            scratch: HashMap::from([("idp".to_string(), "debug".to_string())]),
        })
    }

    async fn complete(
        &self,
        callback: &CallbackValues,
        _scratch: &HashMap<String, String>,
    ) -> AuthResult<LoginCompletion> {
        let user_id = callback
            .get("userid")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthError::identity_provider("debug", "userid is missing"))?;
        Ok(LoginCompletion {
            external_id: user_id.clone(),
            info: HashMap::from([("login-idp".to_string(), "debug".to_string())]),
        })
    }
}
