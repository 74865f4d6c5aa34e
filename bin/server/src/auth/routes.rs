//! Control endpoints served under the proxy prefix.
//!
//! Every handler here marks its response non-cacheable, except the
//! auth-only probe which answers for a sidecar rather than a browser.

use authgate_cookie::{OAuthState, issue_nonce};
use authgate_core::SessionState;
use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use super::cookies::PendingCookies;
use super::decision::{AuthOutcome, authenticate};
use super::request::{FormError, FormValues, remote_addr, request_host};
use crate::config::CallbackUrl;
use crate::pages::{SignInPage, error_page};
use crate::state::ProxyState;

/// Adds `Cache-Control: no-store`.
pub fn prevent_caching(response: &mut Response) {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
}

fn finish(mut response: Response, cookies: PendingCookies) -> Response {
    prevent_caching(&mut response);
    cookies.apply(&mut response);
    response
}

/// A `302 Found` to `location`.
fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(e) => {
            tracing::error!(location, error = %e, "redirect target is not a valid header");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn internal_error(state: &ProxyState) -> Response {
    error_page(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Error",
        "Internal Error",
        &state.options.proxy_prefix,
    )
}

pub(crate) fn bad_request(state: &ProxyState, error: &FormError) -> Response {
    let mut response = error_page(
        StatusCode::BAD_REQUEST,
        "Bad Request",
        &error.0,
        &state.options.proxy_prefix,
    );
    prevent_caching(&mut response);
    response
}

fn permission_denied(state: &ProxyState, message: &str) -> Response {
    error_page(
        StatusCode::FORBIDDEN,
        "Permission Denied",
        message,
        &state.options.proxy_prefix,
    )
}

/// Where to send the browser after sign-in: `rd`, then the
/// `X-Auth-Request-Redirect` header, then the current request URI. Unsafe
/// targets become `/`.
pub fn get_redirect(state: &ProxyState, form: &FormValues, headers: &HeaderMap, uri: &Uri) -> String {
    let redirect = form
        .get("rd")
        .filter(|rd| !rd.is_empty())
        .or_else(|| {
            headers
                .get("x-auth-request-redirect")
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
        })
        .unwrap_or_else(|| uri.path_and_query().map_or("/", |pq| pq.as_str()));

    if state.redirects.is_valid(redirect) {
        redirect.to_string()
    } else {
        "/".to_string()
    }
}

/// The callback URL handed to the provider.
pub fn redirect_uri(state: &ProxyState, headers: &HeaderMap, host: Option<&str>) -> String {
    match &state.options.callback_url {
        CallbackUrl::Absolute(url) => url.to_string(),
        CallbackUrl::Relative(path) => {
            let forwarded = headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            let scheme = match forwarded {
                Some(scheme) => scheme,
                None if state.options.cookie.secure => "https",
                None => "http",
            };
            format!("{scheme}://{}{path}", host.unwrap_or_default())
        }
    }
}

/// Sets the CSRF cookie and redirects to the provider's login page.
pub(crate) fn start_flow(
    state: &ProxyState,
    form: &FormValues,
    parts: &Parts,
    mut cookies: PendingCookies,
) -> Response {
    let host = request_host(&parts.headers, &parts.uri);
    let nonce = issue_nonce();
    state.set_csrf_cookie(host.as_deref(), &nonce, &mut cookies);

    let redirect = get_redirect(state, form, &parts.headers, &parts.uri);
    let redirect_uri = redirect_uri(state, &parts.headers, host.as_deref());
    let oauth_state = OAuthState::new(nonce, redirect);
    let login_url = state.provider.login_url(&redirect_uri, &oauth_state.encode());

    finish(found(&login_url), cookies)
}

/// Renders the sign-in page, clearing any session cookie.
pub(crate) fn sign_in_page(
    state: &ProxyState,
    form: &FormValues,
    parts: &Parts,
    status: StatusCode,
    mut cookies: PendingCookies,
) -> Response {
    let host = request_host(&parts.headers, &parts.uri);
    state.clear_session_cookie(host.as_deref(), &mut cookies);

    let redirect = get_redirect(state, form, &parts.headers, &parts.uri);
    let page = SignInPage {
        provider_name: state.provider.data().name(),
        redirect: &redirect,
        proxy_prefix: &state.options.proxy_prefix,
        show_htpasswd_form: state.display_htpasswd_form(),
    };
    finish(page.render(status), cookies)
}

/// `GET <prefix>/start`
pub async fn oauth_start(state: &ProxyState, req: Request) -> Response {
    match FormValues::read(req).await {
        Ok((form, parts)) => start_flow(state, &form, &parts, PendingCookies::new()),
        Err(e) => bad_request(state, &e),
    }
}

/// `<prefix>/sign_in`: local credentials on POST, otherwise the provider.
pub async fn sign_in(state: &ProxyState, req: Request) -> Response {
    let remote_addr = remote_addr(
        req.headers(),
        req.extensions(),
        &state.options.real_client_ip_header,
    );
    let (form, parts) = match FormValues::read(req).await {
        Ok(read) => read,
        Err(e) => return bad_request(state, &e),
    };

    if let Some(user) = manual_sign_in(state, &form, &parts, &remote_addr).await {
        let host = request_host(&parts.headers, &parts.uri);
        let redirect = get_redirect(state, &form, &parts.headers, &parts.uri);
        let mut cookies = PendingCookies::new();
        let session = SessionState::for_user(user);
        if let Err(e) = state.save_session(host.as_deref(), &session, Utc::now(), &mut cookies) {
            tracing::error!(remote_addr = %remote_addr, error = %e, "could not save session");
            return finish(internal_error(state), PendingCookies::new());
        }
        return finish(found(&redirect), cookies);
    }

    if state.options.skip_provider_button {
        start_flow(state, &form, &parts, PendingCookies::new())
    } else {
        sign_in_page(state, &form, &parts, StatusCode::OK, PendingCookies::new())
    }
}

async fn manual_sign_in(
    state: &ProxyState,
    form: &FormValues,
    parts: &Parts,
    remote_addr: &str,
) -> Option<String> {
    if parts.method != axum::http::Method::POST {
        return None;
    }
    state.credentials.as_ref()?;
    let user = form.get("username").filter(|u| !u.is_empty())?;
    let password = form.get("password").unwrap_or_default();

    if state.validate_credentials(user, password).await {
        tracing::info!(remote_addr, user, "authenticated via htpasswd");
        Some(user.to_string())
    } else {
        tracing::info!(remote_addr, user, "invalid htpasswd login");
        None
    }
}

/// `<prefix>/sign_out`
pub fn sign_out(state: &ProxyState, req: &Request) -> Response {
    let host = request_host(req.headers(), req.uri());
    let mut cookies = PendingCookies::new();
    state.clear_session_cookie(host.as_deref(), &mut cookies);
    finish(found("/"), cookies)
}

/// `<prefix>/callback`
pub async fn oauth_callback(state: &ProxyState, req: Request) -> Response {
    let remote_addr = remote_addr(
        req.headers(),
        req.extensions(),
        &state.options.real_client_ip_header,
    );
    let host = request_host(req.headers(), req.uri());

    // The nonce is single use whatever the outcome.
    let csrf = state.csrf_cookie(req.headers());
    let mut cookies = PendingCookies::new();
    state.clear_csrf_cookie(host.as_deref(), &mut cookies);

    let (form, parts) = match FormValues::read(req).await {
        Ok(read) => read,
        Err(e) => return finish(bad_request(state, &e), cookies),
    };

    let response = complete_callback(
        state,
        &form,
        &parts,
        host.as_deref(),
        csrf.as_deref(),
        &remote_addr,
        &mut cookies,
    )
    .await;
    finish(response, cookies)
}

async fn complete_callback(
    state: &ProxyState,
    form: &FormValues,
    parts: &Parts,
    host: Option<&str>,
    csrf: Option<&str>,
    remote_addr: &str,
    cookies: &mut PendingCookies,
) -> Response {
    if let Some(error) = form.get("error") {
        tracing::info!(remote_addr, error, "provider returned an error");
        return permission_denied(state, error);
    }

    let oauth_state = match OAuthState::parse(form.get("state").unwrap_or_default()) {
        Ok(oauth_state) => oauth_state,
        Err(e) => {
            tracing::info!(remote_addr, error = %e, "rejecting callback");
            return permission_denied(state, &e.to_string());
        }
    };
    if let Err(e) = oauth_state.verify(csrf) {
        tracing::warn!(remote_addr, error = %e, "csrf token mismatch, potential attack");
        return permission_denied(state, &e.to_string());
    }

    let redirect_uri = redirect_uri(state, &parts.headers, host);
    let code = form.get("code").unwrap_or_default();
    let session = match redeem_code(state, &redirect_uri, code).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(remote_addr, error = %e, "error redeeming code");
            return internal_error(state);
        }
    };

    let redirect = if state.redirects.is_valid(oauth_state.redirect()) {
        oauth_state.redirect()
    } else {
        "/"
    };

    if !is_authorized(state, &session).await {
        tracing::info!(remote_addr, session = %session, "permission denied: invalid account");
        return permission_denied(state, "Invalid Account");
    }

    tracing::info!(remote_addr, session = %session, "authentication complete");
    if let Err(e) = state.save_session(host, &session, Utc::now(), cookies) {
        tracing::error!(remote_addr, error = %e, "could not save session");
        return internal_error(state);
    }
    found(redirect)
}

/// Exchanges the code and fills in the identity the token response lacked.
async fn redeem_code(
    state: &ProxyState,
    redirect_uri: &str,
    code: &str,
) -> Result<SessionState, String> {
    let provider = state.provider.as_ref();
    let mut session = provider
        .redeem(redirect_uri, code)
        .await
        .map_err(|e| e.to_string())?;

    if session.email().is_none() {
        if let Some(email) = provider
            .email_address(&session)
            .await
            .map_err(|e| e.to_string())?
        {
            session = session.with_email(email);
        }
    }
    if session.user().is_none() {
        if let Some(user) = provider
            .user_name(&session)
            .await
            .map_err(|e| e.to_string())?
        {
            session = session.with_user(user);
        }
    }
    Ok(session)
}

async fn is_authorized(state: &ProxyState, session: &SessionState) -> bool {
    if session.identity().is_none() {
        return false;
    }
    let email = session.email().unwrap_or_default();
    state.emails.is_allowed(email) && state.provider.validate_group(email).await
}

/// `<prefix>/auth`: 202 with the identity headers, or 401.
pub async fn auth_only(state: &ProxyState, mut req: Request) -> Response {
    let mut cookies = PendingCookies::new();
    let mut response = match authenticate(state, &mut req, &mut cookies).await {
        AuthOutcome::Accepted(headers) => {
            let mut response = StatusCode::ACCEPTED.into_response();
            response.headers_mut().extend(headers);
            response
        }
        AuthOutcome::Forbidden | AuthOutcome::InternalError => {
            (StatusCode::UNAUTHORIZED, "unauthorized request").into_response()
        }
    };
    cookies.apply(&mut response);
    response
}
