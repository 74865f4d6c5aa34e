//! Authentication for proxied requests.
//!
//! - `cookies`: reading, writing and clearing the session and CSRF cookies
//! - `decision`: the per-request state machine and identity header injection
//! - `request`: client address, host and form helpers
//! - `routes`: the control endpoints (`/start`, `/callback`, `/sign_in`, ...)
//!
//! There is no server-side session table: every decision is derived from the
//! request's own cookie or credentials.

pub mod cookies;
pub mod decision;
pub mod request;
pub mod routes;

pub use cookies::{LoadedSession, PendingCookies};
pub use decision::{AuthOutcome, SessionVerdict, authenticate, resolve_session};
pub use routes::{auth_only, oauth_callback, oauth_start, sign_in, sign_out};
