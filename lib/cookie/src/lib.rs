//! Session cookie cryptography for authgate.
//!
//! This crate provides:
//! - Secret derivation (`secret_bytes`) for operator-supplied keys
//! - Time-stamped HMAC signing of cookie values (`CookieSigner`)
//! - AES-GCM encryption of tokens (`Cipher`)
//! - The session payload codec (`encode_session`, `decode_session`)
//! - The CSRF guard for the OAuth round trip (`OAuthState`)
//!
//! # Example
//!
//! ```
//! use authgate_cookie::{CookieSigner, decode_session, encode_session, secret_bytes};
//! use authgate_core::SessionState;
//! use chrono::Utc;
//!
//! let signer = CookieSigner::new(secret_bytes("a very secret value")).unwrap();
//! let session = SessionState::for_user("alice").with_email("alice@example.com");
//!
//! let payload = encode_session(&session, None).unwrap();
//! let cookie = signer.sign("_oauth2_proxy", &payload, Utc::now()).unwrap();
//!
//! let signed = signer.validate("_oauth2_proxy", &cookie, None, Utc::now()).unwrap();
//! assert_eq!(decode_session(&signed.value, None).unwrap(), session);
//! ```

pub mod cipher;
pub mod codec;
pub mod csrf;
pub mod error;
pub mod secret;
pub mod signed;

pub use cipher::Cipher;
pub use codec::{decode_session, encode_session};
pub use csrf::{OAuthState, csrf_cookie_name, issue_nonce};
pub use error::{CipherError, CookieError, CsrfError};
pub use secret::{AES_KEY_SIZES, secret_bytes};
pub use signed::{CookieSigner, SignedValue};
