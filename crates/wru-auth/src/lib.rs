//! # wru-auth
//!
//! Core library of the wru identity-aware reverse proxy.
//!
//! This crate provides:
//! - Session lifecycle management over a document store (pre-login, login,
//!   active sessions, token rotation, lazy timeouts, multi-device tracking)
//! - The identity register mapping federated accounts to local users
//! - The identity provider coordination layer (OAuth1, OAuth2, OIDC, debug)
//! - The backend-to-session directive channel
//!
//! ## Modules
//!
//! - [`clock`] - Explicit clock collaborator (system or pinned for tests)
//! - [`error`] - Error taxonomy shared by the core
//! - [`idp`] - Identity provider trait, registry, and built-in providers
//! - [`register`] - User directory with env/CSV sources and hot reload
//! - [`session`] - Session model and the session store

pub mod clock;
pub mod error;
pub mod idp;
pub mod register;
pub mod session;

pub use clock::Clock;
pub use error::AuthError;
pub use idp::{CallbackValues, IdentityProvider, IdpRegistry, LoginBegin, LoginCompletion};
pub use register::{FederatedAccount, IdentityRegister, ProviderKind, UserRecord};
pub use session::{
    Directive, RequestMeta, Session, SessionStatus, SessionStore, SessionTimeouts, SingleSession,
    UserSession, parse_directive,
};

/// Type alias for results in this crate.
pub type AuthResult<T> = Result<T, AuthError>;
