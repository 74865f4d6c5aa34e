//! Static file upstreams.

use std::path::PathBuf;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt as _;
use tower_http::services::ServeDir;

/// Serves a directory below a mount path.
pub struct FileUpstream {
    mount: String,
    root: PathBuf,
}

impl FileUpstream {
    pub(crate) fn new(mount: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            mount: mount.trim_end_matches('/').to_string(),
            root: root.into(),
        }
    }

    pub(crate) async fn serve(&self, req: Request) -> Response {
        let (mut parts, body) = req.into_parts();
        let Some(rest) = parts.uri.path().strip_prefix(self.mount.as_str()) else {
            return (StatusCode::NOT_FOUND, "404 page not found\n").into_response();
        };

        let path = if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{rest}")
        };
        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };
        parts.uri = match Uri::builder().path_and_query(path_and_query).build() {
            Ok(uri) => uri,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        };

        match ServeDir::new(&self.root)
            .oneshot(Request::from_parts(parts, body))
            .await
        {
            Ok(response) => response.map(Body::new),
            Err(never) => match never {},
        }
    }
}
