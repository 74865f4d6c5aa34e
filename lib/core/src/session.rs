//! The authenticated identity carried by a session cookie.
//!
//! A `SessionState` is never stored server-side; its encoded form is the
//! cookie payload. Values are immutable once built: a provider refresh
//! produces a new `SessionState` rather than editing an existing one.

use chrono::{DateTime, Utc};
use std::fmt;

/// Identity and tokens for one browser session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    user: Option<String>,
    email: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_on: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session holding only a user name, as produced by basic auth.
    #[must_use]
    pub fn for_user(user: impl Into<String>) -> Self {
        Self::new().with_user(user)
    }

    /// Sets the user name. Empty strings are treated as absent.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = non_empty(user.into());
        self
    }

    /// Sets the email address. Empty strings are treated as absent.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = non_empty(email.into());
        self
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = non_empty(token.into());
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = non_empty(token.into());
        self
    }

    #[must_use]
    pub fn with_expires_on(mut self, expires_on: Option<DateTime<Utc>>) -> Self {
        self.expires_on = expires_on;
        self
    }

    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    #[must_use]
    pub fn expires_on(&self) -> Option<DateTime<Utc>> {
        self.expires_on
    }

    /// Returns true once `now` has passed `expires_on`.
    ///
    /// Sessions without an expiry never expire on their own.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_on.is_some_and(|expires_on| expires_on < now)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// The identity asserted to upstreams: the email when known, else the user.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.email().or(self.user())
    }

    /// The plain account portion of the cookie payload.
    #[must_use]
    pub fn account_info(&self) -> String {
        format!(
            "email:{} user:{}",
            self.email().unwrap_or_default(),
            self.user().unwrap_or_default()
        )
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

/// Log-safe rendering: tokens are reported by presence only.
impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session{{{}", self.account_info())?;
        if self.access_token.is_some() {
            write!(f, " token:true")?;
        }
        if let Some(expires_on) = self.expires_on {
            write!(f, " expires:{}", expires_on.to_rfc3339())?;
        }
        if self.refresh_token.is_some() {
            write!(f, " refresh_token:true")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn empty_strings_are_absent() {
        let session = SessionState::new().with_user("").with_email("");
        assert_eq!(session.user(), None);
        assert_eq!(session.email(), None);
    }

    #[test]
    fn session_without_expiry_never_expires() {
        let session = SessionState::for_user("alice");
        assert!(!session.is_expired_at(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn session_expires_after_expires_on() {
        let now = Utc::now();
        let session = SessionState::new().with_expires_on(Some(now - Duration::seconds(1)));
        assert!(session.is_expired_at(now));

        let fresh = SessionState::new().with_expires_on(Some(now + Duration::hours(1)));
        assert!(!fresh.is_expired_at(now));
    }

    #[test]
    fn identity_prefers_email_over_user() {
        let session = SessionState::for_user("bob").with_email("bob@example.com");
        assert_eq!(session.identity(), Some("bob@example.com"));
        assert_eq!(SessionState::for_user("alice").identity(), Some("alice"));
    }

    #[test]
    fn display_never_contains_tokens() {
        let session = SessionState::for_user("bob")
            .with_email("bob@example.com")
            .with_access_token("secret-access")
            .with_refresh_token("secret-refresh");
        let rendered = session.to_string();
        assert!(rendered.contains("email:bob@example.com user:bob"));
        assert!(rendered.contains("token:true"));
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
    }
}
