//! Websocket tunnelling.
//!
//! The handshake is replayed against the upstream over HTTP/1.1. Once the
//! upstream answers `101 Switching Protocols`, both upgraded connections are
//! spliced together until either side closes.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use hyper_util::rt::TokioIo;
use url::Url;

use super::upstream_url;

/// Whether the request asks to switch to the websocket protocol.
pub(crate) fn is_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    let websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    connection_upgrade && websocket
}

pub(crate) async fn proxy(client: &reqwest::Client, target: &Url, mut req: Request) -> Response {
    let client_upgrade = hyper::upgrade::on(&mut req);
    let (parts, _) = req.into_parts();
    let Some(url) = upstream_url(target, &parts.uri) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let mut headers = parts.headers;
    headers.remove(header::HOST);
    let upstream = match client.get(url).headers(headers).send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!(upstream = %target, error = %e, "websocket: proxy error");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    if status != StatusCode::SWITCHING_PROTOCOLS {
        let body = upstream.bytes().await.unwrap_or_default();
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = upstream_headers;
        return response;
    }

    let target = target.clone();
    tokio::spawn(async move {
        let mut upstream_io = match upstream.upgrade().await {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!(upstream = %target, error = %e, "websocket: upstream upgrade failed");
                return;
            }
        };
        let mut client_io = match client_upgrade.await {
            Ok(io) => TokioIo::new(io),
            Err(e) => {
                tracing::warn!(upstream = %target, error = %e, "websocket: client upgrade failed");
                return;
            }
        };
        match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
            Ok((sent, received)) => {
                tracing::debug!(upstream = %target, sent, received, "websocket: closed");
            }
            Err(e) => tracing::debug!(upstream = %target, error = %e, "websocket: closed"),
        }
    });

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *response.headers_mut() = upstream_headers;
    response
}
