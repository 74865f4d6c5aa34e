//! CSRF protection for the OAuth round trip.
//!
//! A random nonce is stored in the CSRF cookie at OAuth start and embedded
//! in the provider `state` parameter as `nonce:redirect`. The callback only
//! proceeds when both halves agree.

use rand::RngCore;

use crate::error::CsrfError;

/// Nonce length in bytes before hex encoding.
pub const NONCE_BYTES: usize = 16;

/// Suffix appended to the session cookie name to name the CSRF cookie.
pub const CSRF_COOKIE_SUFFIX: &str = "_csrf";

/// Issues a fresh hex-encoded nonce.
#[must_use]
pub fn issue_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Name of the CSRF cookie paired with a session cookie.
#[must_use]
pub fn csrf_cookie_name(session_cookie: &str) -> String {
    format!("{session_cookie}{CSRF_COOKIE_SUFFIX}")
}

/// The decoded OAuth `state` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    nonce: String,
    redirect: String,
}

impl OAuthState {
    #[must_use]
    pub fn new(nonce: impl Into<String>, redirect: impl Into<String>) -> Self {
        Self {
            nonce: nonce.into(),
            redirect: redirect.into(),
        }
    }

    /// Splits `nonce:redirect`. The redirect may itself contain colons.
    ///
    /// # Errors
    ///
    /// Returns `CsrfError::MalformedState` when there is no separator.
    pub fn parse(state: &str) -> Result<Self, CsrfError> {
        let (nonce, redirect) = state.split_once(':').ok_or(CsrfError::MalformedState)?;
        Ok(Self::new(nonce, redirect))
    }

    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}", self.nonce, self.redirect)
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    #[must_use]
    pub fn redirect(&self) -> &str {
        &self.redirect
    }

    /// Checks the nonce against the value of the CSRF cookie.
    ///
    /// # Errors
    ///
    /// Returns `CsrfError::MissingCookie` when no cookie was sent and
    /// `CsrfError::Mismatch` when the values differ.
    pub fn verify(&self, cookie: Option<&str>) -> Result<(), CsrfError> {
        let cookie = cookie.ok_or(CsrfError::MissingCookie)?;
        if cookie.is_empty() || cookie != self.nonce {
            return Err(CsrfError::Mismatch);
        }
        Ok(())
    }
}
