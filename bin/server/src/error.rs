//! Error types for assembling and running the proxy.

use std::fmt;

/// Errors raised while building proxy state or serving.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration could not be loaded or failed validation.
    Config { reason: String },
    /// The identity provider could not be constructed.
    Provider { reason: String },
    /// A credential or authenticated-emails file could not be loaded.
    Credentials { reason: String },
    /// Cookie keys could not be set up.
    CookieKeys { reason: String },
    /// An upstream could not be registered.
    Upstream { upstream: String, reason: String },
    /// The listener could not bind.
    Bind { address: String, reason: String },
    /// The server stopped with an error.
    Serve { reason: String },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "configuration error: {reason}"),
            Self::Provider { reason } => write!(f, "provider error: {reason}"),
            Self::Credentials { reason } => write!(f, "credentials error: {reason}"),
            Self::CookieKeys { reason } => write!(f, "cookie-secret error: {reason}"),
            Self::Upstream { upstream, reason } => {
                write!(f, "upstream {upstream:?} error: {reason}")
            }
            Self::Bind { address, reason } => write!(f, "listen ({address}) failed: {reason}"),
            Self::Serve { reason } => write!(f, "server error: {reason}"),
        }
    }
}

impl std::error::Error for ServerError {}
