//! Upstream forwarding.
//!
//! The [`UpstreamRegistry`] maps path patterns to upstream handlers with
//! `ServeMux` semantics: a pattern ending in `/` matches its whole subtree,
//! any other pattern matches exactly, and the longest match wins.

pub mod files;
pub mod http;
pub mod signature;
pub mod websocket;

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use rootcause::prelude::Report;
use url::Url;

use crate::config::Options;
use crate::error::ServerError;
use files::FileUpstream;
use http::HttpUpstream;
use signature::SignatureKey;

pub const UPSTREAM_ADDRESS_HEADER: &str = "GAP-Upstream-Address";

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Removes hop-by-hop headers, including any named by `Connection`.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Builds the upstream URL from the target's origin and the raw request target.
pub(crate) fn upstream_url(target: &Url, uri: &axum::http::Uri) -> Option<Url> {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    Url::parse(&format!("{}{path_and_query}", &target[..url::Position::BeforePath])).ok()
}

enum Handler {
    Http(HttpUpstream),
    Files(FileUpstream),
}

struct Route {
    pattern: String,
    address: HeaderValue,
    handler: Handler,
}

impl Route {
    fn matches(&self, path: &str) -> bool {
        if self.pattern.ends_with('/') {
            path.starts_with(&self.pattern)
        } else {
            path == self.pattern
        }
    }
}

/// The immutable set of configured upstreams.
pub struct UpstreamRegistry {
    routes: Vec<Route>,
    signature_key: Option<Arc<SignatureKey>>,
}

impl UpstreamRegistry {
    /// Registers every configured upstream.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Upstream` when an upstream cannot be served.
    pub fn new(options: &Options) -> Result<Self, Report<ServerError>> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ServerError::Upstream {
                upstream: "*".to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;
        let upgrade_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .http1_only()
            .build()
            .map_err(|e| ServerError::Upstream {
                upstream: "*".to_string(),
                reason: format!("failed to create websocket client: {e}"),
            })?;

        let mut routes = Vec::with_capacity(options.upstreams.len());
        for url in &options.upstreams {
            let invalid = |reason: &str| ServerError::Upstream {
                upstream: url.to_string(),
                reason: reason.to_string(),
            };
            let route = match url.scheme() {
                "http" | "https" => {
                    let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
                    let address = match url.port() {
                        Some(port) => format!("{host}:{port}"),
                        None => host.to_string(),
                    };
                    tracing::info!(path = %url.path(), upstream = %url, "mapping path to upstream");
                    Route {
                        pattern: url.path().to_string(),
                        address: HeaderValue::from_str(&address)
                            .map_err(|_| invalid("invalid host"))?,
                        handler: Handler::Http(HttpUpstream::new(
                            url,
                            client.clone(),
                            options.proxy_websockets.then(|| upgrade_client.clone()),
                            options.pass_host_header,
                            options.flush_interval,
                        )),
                    }
                }
                "file" => {
                    let mount = url
                        .fragment()
                        .filter(|f| !f.is_empty())
                        .unwrap_or(url.path())
                        .to_string();
                    tracing::info!(path = %mount, root = %url.path(), "mapping path to file system");
                    Route {
                        address: HeaderValue::from_str(&mount).map_err(|_| invalid("invalid mount path"))?,
                        handler: Handler::Files(FileUpstream::new(&mount, url.path())),
                        pattern: mount,
                    }
                }
                other => return Err(invalid(&format!("unknown upstream protocol {other}")).into()),
            };
            routes.push(route);
        }
        routes.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));

        Ok(Self {
            routes,
            signature_key: options.signature_key.clone().map(Arc::new),
        })
    }

    fn route(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(path))
    }

    /// Forwards `req` to its upstream.
    ///
    /// `gap_auth` is the identity asserted for the request; it is copied onto
    /// the request before signing.
    pub async fn serve(&self, req: Request, gap_auth: Option<HeaderValue>) -> Response {
        let Some(route) = self.route(req.uri().path()) else {
            return (StatusCode::NOT_FOUND, "404 page not found\n").into_response();
        };

        let mut response = match &route.handler {
            Handler::Http(upstream) => {
                let req = match &self.signature_key {
                    Some(key) => match sign_request(key, req, gap_auth).await {
                        Ok(req) => req,
                        Err(response) => return response,
                    },
                    None => req,
                };
                upstream.serve(req).await
            }
            Handler::Files(files) => files.serve(req).await,
        };
        response.headers_mut().insert(
            HeaderName::from_static("gap-upstream-address"),
            route.address.clone(),
        );
        response
    }
}

async fn sign_request(
    key: &SignatureKey,
    req: Request,
    gap_auth: Option<HeaderValue>,
) -> Result<Request, Response> {
    let (mut parts, body) = req.into_parts();
    parts.headers.insert(
        HeaderName::from_static("gap-auth"),
        gap_auth.unwrap_or_else(|| HeaderValue::from_static("")),
    );

    let (bytes, body) = if parts.headers.contains_key(header::CONTENT_LENGTH) {
        let bytes = to_bytes(body, usize::MAX).await.map_err(|e| {
            tracing::info!(error = %e, "failed to read request body for signing");
            StatusCode::BAD_REQUEST.into_response()
        })?;
        (Some(bytes.clone()), Body::from(bytes))
    } else {
        (None, body)
    };

    key.sign(&parts.method, &parts.uri, &mut parts.headers, bytes.as_deref())
        .map_err(|e| {
            tracing::error!(error = %e, "failed to sign request");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })?;
    Ok(Request::from_parts(parts, body))
}
