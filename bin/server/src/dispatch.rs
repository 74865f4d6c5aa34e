//! Top-level request routing.
//!
//! Every request enters through [`dispatch`]. Fixed utility paths come
//! first, then whitelisted requests (forwarded without authentication), then
//! the control endpoints. Anything else must authenticate before it reaches
//! an upstream.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tower_http::trace::TraceLayer;

use crate::auth::request::{FormValues, decoded_path};
use crate::auth::routes::{bad_request, prevent_caching, sign_in_page, start_flow};
use crate::auth::{self, AuthOutcome, PendingCookies};
use crate::pages::{ROBOTS_TXT, error_page};
use crate::state::ProxyState;

/// Builds the application router around `state`.
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Routes one request.
pub async fn dispatch(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let path = decoded_path(req.uri()).into_owned();
    let paths = &state.paths;

    if path == paths.robots {
        return (StatusCode::OK, ROBOTS_TXT).into_response();
    }
    if path == paths.ping {
        let mut response = (StatusCode::OK, "OK").into_response();
        prevent_caching(&mut response);
        return response;
    }
    if is_whitelisted(&state, req.method(), &path) {
        let mut req = req;
        if state.options.skip_auth_strip_headers {
            strip_auth_headers(&state, req.headers_mut());
        }
        return state.upstreams.serve(req, None).await;
    }

    if path == paths.sign_in {
        auth::sign_in(&state, req).await
    } else if path == paths.sign_out {
        auth::sign_out(&state, &req)
    } else if path == paths.start {
        auth::oauth_start(&state, req).await
    } else if path == paths.callback {
        auth::oauth_callback(&state, req).await
    } else if path == paths.auth {
        auth::auth_only(&state, req).await
    } else {
        proxy(&state, req).await
    }
}

fn is_whitelisted(state: &ProxyState, method: &Method, path: &str) -> bool {
    if state.options.skip_auth_preflight && method == Method::OPTIONS {
        return true;
    }
    state.options.skip_auth_regex.iter().any(|re| re.is_match(path))
}

/// Drops client-supplied copies of the headers the proxy would inject.
fn strip_auth_headers(state: &ProxyState, headers: &mut HeaderMap) {
    let options = &state.options;
    if options.pass_basic_auth {
        headers.remove(header::AUTHORIZATION);
    }
    if options.pass_user_headers {
        headers.remove("x-forwarded-user");
        headers.remove("x-forwarded-email");
    }
    if options.pass_access_token {
        headers.remove("x-forwarded-access-token");
    }
}

/// The default path: authenticate, then forward.
async fn proxy(state: &ProxyState, mut req: Request) -> Response {
    let mut cookies = PendingCookies::new();
    match auth::authenticate(state, &mut req, &mut cookies).await {
        AuthOutcome::Accepted(auth_headers) => {
            let gap_auth = auth_headers.get(HeaderName::from_static("gap-auth")).cloned();
            let mut response = state.upstreams.serve(req, gap_auth).await;
            response.headers_mut().extend(auth_headers);
            cookies.apply(&mut response);
            response
        }
        AuthOutcome::InternalError => {
            let mut response = error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
                &state.options.proxy_prefix,
            );
            cookies.apply(&mut response);
            response
        }
        AuthOutcome::Forbidden => match FormValues::read(req).await {
            Ok((form, parts)) if state.options.skip_provider_button => {
                start_flow(state, &form, &parts, cookies)
            }
            Ok((form, parts)) => sign_in_page(state, &form, &parts, StatusCode::FORBIDDEN, cookies),
            Err(e) => bad_request(state, &e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProvider, Refresh, StaticCredentials, proxy_state};
    use authgate_access::CredentialStore;
    use authgate_core::SessionState;
    use axum::body::{Body, to_bytes};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use chrono::{Duration, Utc};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn upstream() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("public"))
            .mount(&server)
            .await;
        Mock::given(path("/private"))
            .respond_with(ResponseTemplate::new(200).set_body_string("private"))
            .mount(&server)
            .await;
        server
    }

    fn upstream_pair(server: &MockServer) -> String {
        format!("{}/", server.uri())
    }

    fn request(method: &str, uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "app.example.com");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).expect("request")
    }

    async fn body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf-8")
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().expect("ascii").to_string())
            .collect()
    }

    fn session_cookie(state: &ProxyState, session: &SessionState) -> String {
        let mut cookies = PendingCookies::new();
        state
            .save_session(None, session, Utc::now(), &mut cookies)
            .expect("save");
        let mut response = Response::new(Body::empty());
        cookies.apply(&mut response);
        set_cookies(&response)[0]
            .split(';')
            .next()
            .expect("pair")
            .to_string()
    }

    async fn last_forwarded(server: &MockServer) -> wiremock::Request {
        server
            .received_requests()
            .await
            .expect("recording enabled")
            .pop()
            .expect("a forwarded request")
    }

    #[tokio::test]
    async fn ping_and_robots_are_served_locally() {
        let app = router(Arc::new(proxy_state(&[], FakeProvider::default(), None)));

        let response = app.clone().oneshot(request("GET", "/ping", &[])).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CACHE_CONTROL).expect("cache"), "no-store");
        assert_eq!(body(response).await, "OK");

        let response = app.oneshot(request("GET", "/robots.txt", &[])).await.expect("response");
        assert_eq!(body(response).await, "User-agent: *\nDisallow: /");
    }

    #[tokio::test]
    async fn whitelisted_path_skips_auth_and_strips_identity_headers() {
        let server = upstream().await;
        let upstreams = upstream_pair(&server);
        let state = proxy_state(
            &[
                ("upstreams", upstreams.as_str()),
                ("skip_auth_regex", "^/public/"),
                ("skip_auth_strip_headers", "true"),
            ],
            FakeProvider::default(),
            None,
        );
        let app = router(Arc::new(state));

        let response = app
            .oneshot(request(
                "GET",
                "/public/info",
                &[("x-forwarded-user", "mallory"), ("x-forwarded-email", "m@evil.com")],
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("gap-auth").is_none());
        assert_eq!(body(response).await, "public");

        let forwarded = last_forwarded(&server).await;
        assert!(forwarded.headers.get("x-forwarded-user").is_none());
        assert!(forwarded.headers.get("x-forwarded-email").is_none());
    }

    #[tokio::test]
    async fn whitelist_matches_the_decoded_path() {
        let server = upstream().await;
        let upstreams = upstream_pair(&server);
        let state = proxy_state(
            &[
                ("upstreams", upstreams.as_str()),
                ("skip_auth_regex", "^/public/info$"),
            ],
            FakeProvider::default(),
            None,
        );
        let app = router(Arc::new(state));

        let response = app
            .oneshot(request("GET", "/public%2Finfo", &[]))
            .await
            .expect("response");
        assert_ne!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(last_forwarded(&server).await.url.path(), "/public%2Finfo");
    }

    #[tokio::test]
    async fn preflight_is_forwarded_when_configured() {
        let server = upstream().await;
        let upstreams = upstream_pair(&server);
        let state = proxy_state(
            &[
                ("upstreams", upstreams.as_str()),
                ("skip_auth_preflight", "true"),
            ],
            FakeProvider::default(),
            None,
        );
        let app = router(Arc::new(state));
        let response = app
            .oneshot(request("OPTIONS", "/private", &[]))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn basic_auth_user_reaches_upstream() {
        let server = upstream().await;
        let upstreams = upstream_pair(&server);
        let credentials: Arc<dyn CredentialStore> =
            Arc::new(StaticCredentials(vec![("alice", "secret")]));
        let state = proxy_state(
            &[("upstreams", upstreams.as_str())],
            FakeProvider::default(),
            Some(credentials),
        );
        let app = router(Arc::new(state));

        let authorization = format!("Basic {}", STANDARD.encode("alice:secret"));
        let response = app
            .oneshot(request("GET", "/private", &[("authorization", authorization.as_str())]))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("gap-auth").expect("gap-auth"), "alice");

        let forwarded = last_forwarded(&server).await;
        assert_eq!(
            forwarded.headers.get("x-forwarded-user").expect("user"),
            "alice"
        );
        assert!(forwarded.headers.get("x-forwarded-email").is_none());
    }

    #[tokio::test]
    async fn cookie_session_is_proxied_with_identity() {
        let server = upstream().await;
        let upstreams = upstream_pair(&server);
        let state = proxy_state(
            &[("upstreams", upstreams.as_str())],
            FakeProvider::default(),
            None,
        );
        let cookie = session_cookie(&state, &SessionState::new().with_email("bob@example.com"));
        let app = router(Arc::new(state));

        let response = app
            .oneshot(request("GET", "/private", &[("cookie", cookie.as_str())]))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("gap-auth").expect("gap-auth"),
            "bob@example.com"
        );
        assert!(response.headers().get("gap-upstream-address").is_some());
        assert!(set_cookies(&response).is_empty());
        assert_eq!(body(response).await, "private");
    }

    #[tokio::test]
    async fn blocked_email_gets_sign_in_page_and_cleared_cookie() {
        let server = upstream().await;
        let upstreams = upstream_pair(&server);
        let state = proxy_state(
            &[
                ("upstreams", upstreams.as_str()),
                ("email_domains", "example.com"),
            ],
            FakeProvider::default(),
            None,
        );
        let cookie = session_cookie(&state, &SessionState::new().with_email("eve@blocked.com"));
        let app = router(Arc::new(state));

        let response = app
            .oneshot(request("GET", "/private", &[("cookie", cookie.as_str())]))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let cookies = set_cookies(&response);
        assert!(!cookies.is_empty());
        assert!(cookies.iter().all(|c| c.starts_with("_oauth2_proxy=;")));
        assert!(body(response).await.contains("Sign in with Fake"));
        assert!(
            server
                .received_requests()
                .await
                .expect("recording enabled")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn expired_session_is_cleared_even_after_refresh() {
        let server = upstream().await;
        let upstreams = upstream_pair(&server);
        let state = proxy_state(
            &[
                ("upstreams", upstreams.as_str()),
                ("pass_access_token", "true"),
            ],
            FakeProvider::default().with_refresh(Refresh::Unchanged),
            None,
        );
        let expired = SessionState::new()
            .with_email("bob@example.com")
            .with_access_token("access")
            .with_expires_on(Some(Utc::now() - Duration::minutes(5)));
        let cookie = session_cookie(&state, &expired);
        let app = router(Arc::new(state));

        let response = app
            .oneshot(request("GET", "/private", &[("cookie", cookie.as_str())]))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(
            set_cookies(&response)
                .iter()
                .any(|c| c.starts_with("_oauth2_proxy=;") && c.contains("Max-Age=0"))
        );
    }

    #[tokio::test]
    async fn unauthenticated_request_goes_to_provider_when_button_skipped() {
        let state = proxy_state(&[("skip_provider_button", "true")], FakeProvider::default(), None);
        let app = router(Arc::new(state));
        let response = app
            .oneshot(request("GET", "/private?x=1", &[]))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response
            .headers()
            .get(header::LOCATION)
            .expect("location")
            .to_str()
            .expect("ascii");
        assert!(location.starts_with("https://provider.example.com/oauth/authorize"));
        assert!(
            set_cookies(&response)
                .iter()
                .any(|c| c.starts_with("_oauth2_proxy_csrf="))
        );
    }

    #[tokio::test]
    async fn control_paths_are_routed() {
        let app = router(Arc::new(proxy_state(&[], FakeProvider::default(), None)));

        let response = app
            .clone()
            .oneshot(request("GET", "/oauth2/sign_out", &[]))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FOUND);

        let response = app
            .clone()
            .oneshot(request("GET", "/oauth2/auth", &[]))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request("GET", "/oauth2/sign_in", &[]))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
