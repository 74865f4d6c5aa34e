//! Request inspection shared by the control endpoints and the state machine.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Request};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap, Method, Uri, header};
use percent_encoding::percent_decode_str;

/// Form bodies larger than this are rejected.
const MAX_FORM_BYTES: usize = 10 << 20;

/// The client address for logs: the peer, plus the configured client-IP
/// header when the request carries it.
pub fn remote_addr(headers: &HeaderMap, extensions: &Extensions, client_ip_header: &str) -> String {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.to_string());

    match client_ip(headers, client_ip_header) {
        Some(ip) => format!("{peer} ({ip:?})"),
        None => peer,
    }
}

fn client_ip<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    if name.is_empty() {
        return None;
    }
    let value = headers.get(name)?.to_str().ok().filter(|v| !v.is_empty())?;
    if name.eq_ignore_ascii_case("x-forwarded-for") {
        value.split(',').next().map(str::trim)
    } else {
        Some(value)
    }
}

/// The host the client addressed.
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
}

/// The request path with percent-escapes decoded.
pub fn decoded_path(uri: &Uri) -> Cow<'_, str> {
    percent_decode_str(uri.path()).decode_utf8_lossy()
}

/// Query and urlencoded body parameters; body values take precedence.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormValues(Vec<(String, String)>);

/// The request body could not be read as a form.
#[derive(Debug)]
pub struct FormError(pub String);

impl FormValues {
    /// Reads the query string, and the body when it is an urlencoded form.
    ///
    /// # Errors
    ///
    /// Returns `FormError` when the body cannot be read.
    pub async fn read(req: Request) -> Result<(Self, Parts), FormError> {
        let (parts, body) = req.into_parts();
        let mut values = Vec::new();

        let is_form = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
        if is_form && matches!(parts.method, Method::POST | Method::PUT | Method::PATCH) {
            let bytes = to_bytes(body, MAX_FORM_BYTES)
                .await
                .map_err(|e| FormError(e.to_string()))?;
            values.extend(url::form_urlencoded::parse(&bytes).into_owned());
        }
        if let Some(query) = parts.uri.query() {
            values.extend(url::form_urlencoded::parse(query.as_bytes()).into_owned());
        }

        Ok((Self(values), parts))
    }

    /// The first value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    #[test]
    fn remote_addr_includes_client_ip_header() {
        let mut req = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .body(Body::empty())
            .expect("request");
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));

        assert_eq!(
            remote_addr(req.headers(), req.extensions(), "X-Forwarded-For"),
            r#"127.0.0.1:5000 ("10.0.0.1")"#
        );
        assert_eq!(
            remote_addr(req.headers(), req.extensions(), "X-Real-IP"),
            "127.0.0.1:5000"
        );
    }

    #[test]
    fn path_escapes_are_decoded() {
        let uri: Uri = "/a%2Fb/c%20d?x=%2F".parse().expect("uri");
        assert_eq!(decoded_path(&uri), "/a/b/c d");
        let plain: Uri = "/plain".parse().expect("uri");
        assert!(matches!(decoded_path(&plain), Cow::Borrowed("/plain")));
    }

    #[test]
    fn host_comes_from_header() {
        let mut req = Request::builder()
            .uri("/")
            .body(Body::empty())
            .expect("request");
        assert_eq!(request_host(req.headers(), req.uri()), None);
        req.headers_mut()
            .insert(header::HOST, HeaderValue::from_static("app.example.com:8443"));
        assert_eq!(
            request_host(req.headers(), req.uri()).as_deref(),
            Some("app.example.com:8443")
        );
    }

    #[tokio::test]
    async fn body_values_take_precedence_over_query() {
        let req = Request::builder()
            .method("POST")
            .uri("/oauth2/sign_in?rd=%2Fquery&extra=1")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=alice&rd=%2Fbody"))
            .expect("request");

        let (form, parts) = FormValues::read(req).await.expect("form");
        assert_eq!(parts.method, Method::POST);
        assert_eq!(form.get("username"), Some("alice"));
        assert_eq!(form.get("rd"), Some("/body"));
        assert_eq!(form.get("extra"), Some("1"));
    }

    #[tokio::test]
    async fn get_bodies_are_not_parsed() {
        let req = Request::builder()
            .uri("/start")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("rd=%2Fbody"))
            .expect("request");
        let (form, _) = FormValues::read(req).await.expect("form");
        assert_eq!(form.get("rd"), None);
    }
}
