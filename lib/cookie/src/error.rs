//! Error types for the cookie crate.
//!
//! - `CookieError`: signing, validation and session payload failures
//! - `CipherError`: symmetric encryption failures
//! - `CsrfError`: OAuth state and nonce verification failures

use std::fmt;

/// Errors from signing or reading a cookie value.
///
/// Every variant means "no session" to the authentication path; they are
/// kept distinct only so logs say why a cookie was ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieError {
    /// No secret was configured, so nothing can be signed.
    MissingSecret,
    /// The value does not have the `value|timestamp|signature` shape.
    Malformed { reason: String },
    /// The signature does not match the value.
    InvalidSignature,
    /// The cookie is older than the configured max age.
    Expired { age_secs: i64 },
    /// The timestamp is too far in the future to be trusted.
    FromFuture { timestamp: i64 },
    /// The session payload could not be decoded.
    InvalidPayload { reason: String },
    /// Encrypting or decrypting a token failed.
    Cipher(CipherError),
}

impl fmt::Display for CookieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSecret => write!(f, "cookie secret is not configured"),
            Self::Malformed { reason } => write!(f, "malformed cookie value: {reason}"),
            Self::InvalidSignature => write!(f, "cookie signature not valid"),
            Self::Expired { age_secs } => write!(f, "cookie expired ({age_secs}s old)"),
            Self::FromFuture { timestamp } => {
                write!(f, "cookie timestamp {timestamp} is in the future")
            }
            Self::InvalidPayload { reason } => {
                write!(f, "could not decode session state: {reason}")
            }
            Self::Cipher(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CookieError {}

impl From<CipherError> for CookieError {
    fn from(err: CipherError) -> Self {
        Self::Cipher(err)
    }
}

/// Errors from the AES-GCM token cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// Keys must be 16, 24 or 32 bytes.
    InvalidKeyLength { len: usize },
    Encrypt,
    Decrypt { reason: String },
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKeyLength { len } => {
                write!(f, "cipher key must be 16, 24 or 32 bytes, got {len}")
            }
            Self::Encrypt => write!(f, "failed to encrypt value"),
            Self::Decrypt { reason } => write!(f, "failed to decrypt value: {reason}"),
        }
    }
}

impl std::error::Error for CipherError {}

/// Errors from the CSRF guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrfError {
    /// The `state` parameter is not `nonce:redirect`.
    MalformedState,
    /// The CSRF cookie was not sent back.
    MissingCookie,
    /// The nonce in `state` does not match the CSRF cookie.
    Mismatch,
}

impl fmt::Display for CsrfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedState => write!(f, "invalid state"),
            Self::MissingCookie => write!(f, "csrf cookie missing"),
            Self::Mismatch => write!(f, "csrf failed"),
        }
    }
}

impl std::error::Error for CsrfError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_display_includes_age() {
        let err = CookieError::Expired { age_secs: 90 };
        assert!(err.to_string().contains("90s"));
    }

    #[test]
    fn cipher_error_converts_into_cookie_error() {
        let err: CookieError = CipherError::InvalidKeyLength { len: 7 }.into();
        assert!(err.to_string().contains("got 7"));
    }

    #[test]
    fn csrf_mismatch_display() {
        assert_eq!(CsrfError::Mismatch.to_string(), "csrf failed");
    }
}
