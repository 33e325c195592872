//! # wru-server
//!
//! The HTTP surface of the wru identity-aware reverse proxy: configuration
//! from the environment, the `/.wru` auth router, the request pipeline that
//! attaches sessions and flushes directives, and the reverse proxy that
//! forwards authenticated traffic to the configured backends.

pub mod client_info;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod proxy;
pub mod server;
pub mod templates;

pub use config::{ConfigError, CookieMode, Route, ServerConfig};
pub use observability::init_tracing;
pub use server::{AppState, WruServer, build_app};
