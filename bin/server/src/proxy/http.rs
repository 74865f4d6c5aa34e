//! Streaming HTTP reverse proxy.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio_stream::StreamExt as _;
use url::Url;

use super::{strip_hop_by_hop, upstream_url, websocket};

/// Largest number of upstream chunks batched into one write.
const FLUSH_BATCH: usize = 64;

/// An `http`/`https` upstream.
pub struct HttpUpstream {
    target: Url,
    client: reqwest::Client,
    upgrade_client: Option<reqwest::Client>,
    pass_host_header: bool,
    flush_interval: Duration,
}

impl HttpUpstream {
    /// `upgrade_client` enables websocket proxying when present.
    pub(crate) fn new(
        target: &Url,
        client: reqwest::Client,
        upgrade_client: Option<reqwest::Client>,
        pass_host_header: bool,
        flush_interval: Duration,
    ) -> Self {
        Self {
            target: target.clone(),
            client,
            upgrade_client,
            pass_host_header,
            flush_interval,
        }
    }

    pub(crate) async fn serve(&self, req: Request) -> Response {
        if let Some(client) = &self.upgrade_client {
            if websocket::is_upgrade(req.headers()) {
                return websocket::proxy(client, &self.target, req).await;
            }
        }
        self.forward(req).await
    }

    async fn forward(&self, req: Request) -> Response {
        let (parts, body) = req.into_parts();
        let Some(url) = upstream_url(&self.target, &parts.uri) else {
            return StatusCode::BAD_REQUEST.into_response();
        };

        let has_body = parts.headers.contains_key(header::CONTENT_LENGTH)
            || parts.headers.contains_key(header::TRANSFER_ENCODING);
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        if !self.pass_host_header {
            headers.remove(header::HOST);
        }
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        if let Some(ip) = peer {
            append_forwarded_for(&mut headers, &ip.to_string());
        }

        let mut request = self.client.request(parts.method, url).headers(headers);
        if has_body {
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        match request.send().await {
            Ok(upstream) => self.relay(upstream),
            Err(e) => {
                tracing::error!(upstream = %self.target, error = %e, "http: proxy error");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }

    fn relay(&self, upstream: reqwest::Response) -> Response {
        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let stream = upstream.bytes_stream();
        let body = if self.flush_interval.is_zero() {
            Body::from_stream(stream)
        } else {
            Body::from_stream(
                stream
                    .chunks_timeout(FLUSH_BATCH, self.flush_interval)
                    .map(|batch| {
                        batch
                            .into_iter()
                            .collect::<Result<Vec<Bytes>, reqwest::Error>>()
                            .map(|chunks| Bytes::from(chunks.concat()))
                    }),
            )
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: &str) {
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}
