//! authgate server: an authenticating reverse proxy.
//!
//! Requests are authenticated against an OAuth2/OIDC provider (or local
//! htpasswd credentials) before they are forwarded to the configured
//! upstreams. Identity is carried in a signed cookie; nothing is stored
//! server-side.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pages;
pub mod proxy;
pub mod state;
pub mod watcher;

#[cfg(test)]
mod testing;
