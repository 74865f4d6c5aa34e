//! Access-control building blocks for authgate.
//!
//! This crate provides:
//! - Redirect validation against open-redirect tricks (`RedirectValidator`)
//! - The email/domain authorization predicate (`EmailValidator`)
//! - Local credentials for basic auth (`CredentialStore`, `HtpasswdFile`)

pub mod error;
pub mod htpasswd;
pub mod redirect;
pub mod validator;

pub use error::AccessError;
pub use htpasswd::{CredentialStore, HtpasswdFile};
pub use redirect::RedirectValidator;
pub use validator::EmailValidator;
