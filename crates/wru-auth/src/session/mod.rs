//! Session model and session store.
//!
//! A browser/device owns a [`SingleSession`] keyed by the opaque cookie
//! token; all of a user's devices hang off one [`UserSession`] which also
//! carries the backend-writable data bag. Handlers receive a [`Session`]
//! snapshot combining both plus the derived [`SessionStatus`].

pub mod meta;
pub mod model;
pub mod store;
pub mod token;

pub use meta::RequestMeta;
pub use model::{
    Directive, Session, SessionStatus, SingleSession, UserSession, parse_directive,
};
pub use store::{SessionStore, SessionTimeouts};
pub use token::generate_token;
