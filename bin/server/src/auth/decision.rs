//! The per-request authentication decision.
//!
//! [`resolve_session`] decides what happens to the cookie session without
//! touching the response. [`authenticate`] applies that verdict (saving or
//! clearing cookies), falls back to HTTP Basic credentials, and injects the
//! identity headers for the upstream.
//!
//! The order of checks is fixed: refresh, then absolute expiry, then
//! revalidation of stale sessions, then the email allow-list.

use authgate_access::EmailValidator;
use authgate_core::SessionState;
use authgate_providers::Provider;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};

use super::cookies::{LoadedSession, PendingCookies};
use super::request::{remote_addr, request_host};
use crate::state::ProxyState;

/// What to do with the cookie session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionVerdict {
    /// No usable cookie was sent.
    Absent,
    /// The session is valid and the cookie stays as it is.
    Keep(SessionState),
    /// The session is valid and must be written back.
    Save(SessionState),
    /// The session was rejected; its cookie must be removed.
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persist {
    No,
    /// Older than the refresh interval; revalidate before writing back.
    Stale,
    /// Tokens were refreshed by the provider.
    Refreshed,
}

/// Decides the fate of a cookie session.
pub async fn resolve_session(
    provider: &dyn Provider,
    emails: &EmailValidator,
    loaded: Option<LoadedSession>,
    refresh_interval: Option<Duration>,
    now: DateTime<Utc>,
    remote_addr: &str,
) -> SessionVerdict {
    let Some(LoadedSession { mut session, age }) = loaded else {
        return SessionVerdict::Absent;
    };

    let mut persist = Persist::No;
    if let Some(interval) = refresh_interval {
        if age > interval && session.access_token().is_some() {
            tracing::info!(
                remote_addr,
                age = %age,
                session = %session,
                "refreshing old session cookie"
            );
            persist = Persist::Stale;
        }
    }

    match provider.refresh_session_if_needed(&session).await {
        Err(e) => {
            tracing::info!(
                remote_addr,
                error = %e,
                session = %session,
                "removing session: error refreshing access token"
            );
            return SessionVerdict::Clear;
        }
        Ok(Some(refreshed)) => {
            session = refreshed;
            persist = Persist::Refreshed;
        }
        Ok(None) => {}
    }

    if session.is_expired_at(now) {
        tracing::info!(remote_addr, session = %session, "removing session: token expired");
        return SessionVerdict::Clear;
    }

    if persist == Persist::Stale {
        if session.access_token().is_some() {
            if !provider.validate_session(&session).await {
                tracing::info!(remote_addr, session = %session, "removing session: error validating");
                return SessionVerdict::Clear;
            }
        } else {
            persist = Persist::No;
        }
    }

    if let Some(email) = session.email() {
        if !emails.is_allowed(email) {
            tracing::info!(remote_addr, session = %session, "permission denied: removing session");
            return SessionVerdict::Clear;
        }
    }

    match persist {
        Persist::No => SessionVerdict::Keep(session),
        Persist::Stale | Persist::Refreshed => SessionVerdict::Save(session),
    }
}

/// The result of authenticating a request.
#[derive(Debug)]
pub enum AuthOutcome {
    /// Carries the headers to add to the eventual response.
    Accepted(HeaderMap),
    Forbidden,
    InternalError,
}

/// Authenticates `req`, recording cookie changes in `cookies`.
///
/// On success the request carries the configured identity headers.
pub async fn authenticate(
    state: &ProxyState,
    req: &mut Request,
    cookies: &mut PendingCookies,
) -> AuthOutcome {
    let now = Utc::now();
    let remote_addr = remote_addr(
        req.headers(),
        req.extensions(),
        &state.options.real_client_ip_header,
    );
    let host = request_host(req.headers(), req.uri());

    let loaded = state.load_session(req.headers(), now, &remote_addr);
    let verdict = resolve_session(
        state.provider.as_ref(),
        &state.emails,
        loaded,
        state.options.cookie.refresh,
        now,
        &remote_addr,
    )
    .await;

    let session = match verdict {
        SessionVerdict::Absent => None,
        SessionVerdict::Keep(session) => Some(session),
        SessionVerdict::Save(session) => {
            if let Err(e) = state.save_session(host.as_deref(), &session, now, cookies) {
                tracing::error!(remote_addr = %remote_addr, error = %e, "could not save session");
                return AuthOutcome::InternalError;
            }
            Some(session)
        }
        SessionVerdict::Clear => {
            state.clear_session_cookie(host.as_deref(), cookies);
            None
        }
    };

    let session = match session {
        Some(session) => Some(session),
        None => basic_auth(state, req.headers(), &remote_addr).await,
    };
    let Some(session) = session else {
        return AuthOutcome::Forbidden;
    };

    AuthOutcome::Accepted(inject_identity(state, req.headers_mut(), &session))
}

/// Checks HTTP Basic credentials against the local credential store.
async fn basic_auth(
    state: &ProxyState,
    headers: &HeaderMap,
    remote_addr: &str,
) -> Option<SessionState> {
    state.credentials.as_ref()?;
    let authorization = headers.get(header::AUTHORIZATION)?.to_str().ok()?;

    let Some(("Basic", encoded)) = authorization.split_once(' ') else {
        tracing::info!(remote_addr, "invalid Authorization header");
        return None;
    };
    let decoded = match STANDARD.decode(encoded) {
        Ok(decoded) => String::from_utf8_lossy(&decoded).into_owned(),
        Err(e) => {
            tracing::info!(remote_addr, error = %e, "invalid Authorization header");
            return None;
        }
    };
    let Some((user, password)) = decoded.split_once(':') else {
        tracing::info!(remote_addr, "invalid basic auth format");
        return None;
    };

    if state.validate_credentials(user, password).await {
        tracing::info!(remote_addr, user, "authenticated via basic auth");
        Some(SessionState::for_user(user))
    } else {
        tracing::info!(remote_addr, user, "basic auth credentials rejected");
        None
    }
}

fn set(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(_) => {
            tracing::warn!(header = name, "identity value is not a valid header");
            headers.remove(name);
        }
    }
}

/// Adds identity headers to the upstream request and returns the ones
/// destined for the response.
fn inject_identity(
    state: &ProxyState,
    request: &mut HeaderMap,
    session: &SessionState,
) -> HeaderMap {
    let options = &state.options;
    let user = session.user().unwrap_or_default();
    let mut response = HeaderMap::new();

    if options.pass_basic_auth {
        let credentials = STANDARD.encode(format!("{user}:{}", options.basic_auth_password));
        set(request, "authorization", &format!("Basic {credentials}"));
    }
    if options.pass_user_headers {
        set(request, "x-forwarded-user", user);
        match session.email() {
            Some(email) => set(request, "x-forwarded-email", email),
            None => {
                request.remove("x-forwarded-email");
            }
        }
    }
    if options.set_xauthrequest {
        set(&mut response, "x-auth-request-user", user);
        if let Some(email) = session.email() {
            set(&mut response, "x-auth-request-email", email);
        }
        if options.pass_access_token {
            if let Some(token) = session.access_token() {
                set(&mut response, "x-auth-request-access-token", token);
            }
        }
    }
    if options.pass_access_token {
        match session.access_token() {
            Some(token) => set(request, "x-forwarded-access-token", token),
            None => {
                request.remove("x-forwarded-access-token");
            }
        }
    }
    set(&mut response, "gap-auth", session.email().unwrap_or(user));

    response
}
