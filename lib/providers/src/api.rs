//! JSON helpers for provider REST APIs.

use reqwest::Client;
use rootcause::prelude::Report;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ProviderError;

/// GETs `url` and decodes a JSON body.
///
/// When `bearer` is set it is sent as an `Authorization: Bearer` header.
pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &Client,
    url: &Url,
    bearer: Option<&str>,
) -> Result<T, Report<ProviderError>> {
    let mut request = http
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "application/json");
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|e| ProviderError::Request {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let status = response.status();
    let body = response.text().await.map_err(|e| ProviderError::Request {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !status.is_success() {
        return Err(ProviderError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        }
        .into());
    }

    Ok(serde_json::from_str(&body).map_err(|e| ProviderError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })?)
}
