//! Session and CSRF cookies.
//!
//! Responses may carry several cookies with the same name (the session
//! cookie is cleared twice when no domain is configured), so outgoing
//! cookies are collected as raw `Set-Cookie` values instead of in a jar.

use authgate_core::SessionState;
use authgate_cookie::CookieError;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{DateTime, Duration, Utc};

use crate::state::ProxyState;

/// Browsers and common proxies start dropping cookies around 4 KiB.
const MAX_COOKIE_BYTES: usize = 4000;

/// `Set-Cookie` values waiting to be attached to a response.
#[derive(Debug, Default)]
pub struct PendingCookies(Vec<HeaderValue>);

impl PendingCookies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cookie: &Cookie<'_>) {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => self.0.push(value),
            Err(e) => tracing::error!(name = cookie.name(), error = %e, "cookie is not a valid header"),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends every pending cookie to `response`.
    pub fn apply(self, response: &mut Response) {
        for value in self.0 {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
}

/// A session recovered from a request cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSession {
    pub session: SessionState,
    /// Time since the cookie was issued.
    pub age: Duration,
}

/// The request `Host` without its port.
fn host_name(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

fn to_time(duration: Duration) -> time::Duration {
    time::Duration::seconds(duration.num_seconds())
}

impl ProxyState {
    fn make_cookie(
        &self,
        host: Option<&str>,
        name: &str,
        value: String,
        max_age: Duration,
    ) -> Cookie<'static> {
        let options = &self.options.cookie;
        if let (Some(domain), Some(host)) = (&options.domain, host) {
            if !host_name(host).ends_with(domain.as_str()) {
                tracing::warn!(
                    host = host_name(host),
                    domain = %domain,
                    "request host does not match the configured cookie domain"
                );
            }
        }

        let mut builder = Cookie::build((name.to_string(), value))
            .path(options.path.clone())
            .http_only(options.http_only)
            .secure(options.secure)
            .max_age(to_time(max_age));
        if let Some(domain) = &options.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(same_site) = options.same_site {
            builder = builder.same_site(same_site);
        }
        let cookie = builder.build();

        let size = cookie.to_string().len();
        if size > MAX_COOKIE_BYTES {
            tracing::warn!(name, size, "cookie may be too big");
        }
        cookie
    }

    /// Signs and sets the session cookie for `session`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be encoded or signed.
    pub fn save_session(
        &self,
        host: Option<&str>,
        session: &SessionState,
        now: DateTime<Utc>,
        cookies: &mut PendingCookies,
    ) -> Result<(), CookieError> {
        let value = self
            .provider
            .cookie_for_session(session, self.cipher.as_ref())?;
        let signed = self.signer.sign(&self.options.cookie.name, &value, now)?;
        cookies.push(&self.make_cookie(
            host,
            &self.options.cookie.name,
            signed,
            self.options.cookie.expire,
        ));
        Ok(())
    }

    /// Expires the session cookie.
    ///
    /// Without a configured domain a second clearing cookie is scoped to the
    /// request host, so cookies set under either convention are removed.
    pub fn clear_session_cookie(&self, host: Option<&str>, cookies: &mut PendingCookies) {
        let cleared = self.make_cookie(host, &self.options.cookie.name, String::new(), Duration::zero());
        cookies.push(&cleared);
        if self.options.cookie.domain.is_none() {
            if let Some(host) = host {
                let mut scoped = cleared;
                scoped.set_domain(host_name(host).to_string());
                cookies.push(&scoped);
            }
        }
    }

    pub fn set_csrf_cookie(&self, host: Option<&str>, nonce: &str, cookies: &mut PendingCookies) {
        cookies.push(&self.make_cookie(
            host,
            &self.csrf_cookie_name,
            nonce.to_string(),
            self.options.cookie.expire,
        ));
    }

    pub fn clear_csrf_cookie(&self, host: Option<&str>, cookies: &mut PendingCookies) {
        cookies.push(&self.make_cookie(host, &self.csrf_cookie_name, String::new(), Duration::zero()));
    }

    /// The CSRF nonce the browser sent back, if any.
    #[must_use]
    pub fn csrf_cookie(&self, headers: &HeaderMap) -> Option<String> {
        CookieJar::from_headers(headers)
            .get(&self.csrf_cookie_name)
            .map(|c| c.value().to_string())
    }

    /// Reads and verifies the session cookie.
    ///
    /// Every failure means "no session"; the reason is logged.
    #[must_use]
    pub fn load_session(
        &self,
        headers: &HeaderMap,
        now: DateTime<Utc>,
        remote_addr: &str,
    ) -> Option<LoadedSession> {
        let name = &self.options.cookie.name;
        let jar = CookieJar::from_headers(headers);
        let cookie = jar.get(name)?;

        let signed = match self
            .signer
            .validate(name, cookie.value(), Some(self.options.cookie.expire), now)
        {
            Ok(signed) => signed,
            Err(e) => {
                tracing::info!(remote_addr, error = %e, "cookie signature not valid");
                return None;
            }
        };
        match self
            .provider
            .session_from_cookie(&signed.value, self.cipher.as_ref())
        {
            Ok(session) => Some(LoadedSession {
                session,
                age: now - signed.issued_at,
            }),
            Err(e) => {
                tracing::info!(remote_addr, error = %e, "could not decode session cookie");
                None
            }
        }
    }
}
