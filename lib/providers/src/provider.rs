//! The identity provider contract and its shared configuration.
//!
//! Every provider variant holds a [`ProviderData`] and implements
//! [`Provider`]. The trait's default methods implement plain OAuth2
//! behaviour; variants override only what their service does differently.

use async_trait::async_trait;
use authgate_cookie::{Cipher, CookieError, decode_session, encode_session};
use authgate_core::SessionState;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, RedirectUrl, TokenResponse,
    TokenUrl,
};
use rootcause::prelude::Report;
use url::Url;

use crate::error::ProviderError;

/// Operator-supplied provider settings, before variant defaults apply.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub login_url: Option<Url>,
    pub redeem_url: Option<Url>,
    pub profile_url: Option<Url>,
    pub validate_url: Option<Url>,
    pub scope: Option<String>,
    pub approval_prompt: String,
}

/// Default endpoints a provider variant falls back to.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub login_url: Option<Url>,
    pub redeem_url: Option<Url>,
    pub profile_url: Option<Url>,
    pub validate_url: Option<Url>,
}

/// Parses a built-in endpoint URL.
pub(crate) fn endpoint(url: &str) -> Result<Url, Report<ProviderError>> {
    Ok(Url::parse(url).map_err(|e| ProviderError::Configuration {
        reason: format!("invalid endpoint {url}: {e}"),
    })?)
}

/// Resolved, immutable provider settings.
#[derive(Debug, Clone)]
pub struct ProviderData {
    name: String,
    client_id: String,
    client_secret: String,
    login_url: Url,
    redeem_url: Url,
    profile_url: Option<Url>,
    validate_url: Option<Url>,
    scope: String,
    approval_prompt: String,
    http: reqwest::Client,
}

impl ProviderData {
    /// Resolves operator settings against a variant's defaults.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` when no login or redeem URL is
    /// available, or the HTTP client cannot be built.
    pub fn resolve(
        name: &str,
        config: &ProviderConfig,
        defaults: Endpoints,
        default_scope: &str,
    ) -> Result<Self, Report<ProviderError>> {
        let missing = |setting: &str| ProviderError::Configuration {
            reason: format!("{name} provider needs a {setting}"),
        };
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProviderError::Configuration {
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            name: name.to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            login_url: config
                .login_url
                .clone()
                .or(defaults.login_url)
                .ok_or_else(|| missing("login url"))?,
            redeem_url: config
                .redeem_url
                .clone()
                .or(defaults.redeem_url)
                .ok_or_else(|| missing("redeem url"))?,
            profile_url: config.profile_url.clone().or(defaults.profile_url),
            validate_url: config.validate_url.clone().or(defaults.validate_url),
            scope: config
                .scope
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default_scope.to_string()),
            approval_prompt: config.approval_prompt.clone(),
            http,
        })
    }

    /// Human-readable provider name, shown on the sign-in page.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    #[must_use]
    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    #[must_use]
    pub fn redeem_url(&self) -> &Url {
        &self.redeem_url
    }

    #[must_use]
    pub fn profile_url(&self) -> Option<&Url> {
        self.profile_url.as_ref()
    }

    #[must_use]
    pub fn validate_url(&self) -> Option<&Url> {
        self.validate_url.as_ref()
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Overrides the scope after resolution, e.g. when group checks need more access.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Builds the authorization-request URL.
    ///
    /// Query parameters already on the configured login URL are kept unless
    /// the flow sets them itself.
    #[must_use]
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        const OWNED: [&str; 4] = ["redirect_uri", "approval_prompt", "client_id", "response_type"];
        let mut url = self.login_url.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .into_owned()
            .filter(|(key, _)| !OWNED.contains(&key.as_str()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("approval_prompt", &self.approval_prompt)
            .append_pair("scope", &self.scope)
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("state", state);
        url.to_string()
    }

    /// Exchanges an authorization code at the redeem URL.
    ///
    /// The resulting session carries only the access token.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::MissingCode` for an empty code and
    /// `ProviderError::Redemption` when the exchange fails.
    pub async fn redeem_code(
        &self,
        redirect_uri: &str,
        code: &str,
    ) -> Result<SessionState, Report<ProviderError>> {
        if code.is_empty() {
            return Err(ProviderError::MissingCode.into());
        }
        let redirect_uri =
            RedirectUrl::new(redirect_uri.to_string()).map_err(|e| ProviderError::Redemption {
                reason: format!("invalid redirect uri: {e}"),
            })?;

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(AuthUrl::from_url(self.login_url.clone()))
            .set_token_uri(TokenUrl::from_url(self.redeem_url.clone()))
            .set_redirect_uri(redirect_uri)
            .set_auth_type(AuthType::RequestBody);

        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::Redemption {
                reason: e.to_string(),
            })?;

        Ok(SessionState::new().with_access_token(token.access_token().secret().clone()))
    }

    /// Probes the validate URL with an access token.
    ///
    /// With `bearer` the token travels in the `Authorization` header,
    /// otherwise as the `access_token` query parameter. Only a 200 response
    /// counts as valid.
    pub async fn validate_token(&self, access_token: Option<&str>, bearer: bool) -> bool {
        let (Some(token), Some(validate_url)) = (access_token, self.validate_url.as_ref()) else {
            return false;
        };
        let mut url = validate_url.clone();
        let mut request = if bearer {
            self.http.get(url).bearer_auth(token)
        } else {
            url.query_pairs_mut().append_pair("access_token", token);
            self.http.get(url)
        };
        request = request.header(reqwest::header::ACCEPT, "application/json");

        match request.send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => true,
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                tracing::info!(status, body = %body, "token validation request failed");
                false
            }
            Err(e) => {
                tracing::info!(error = %e, "token validation request failed");
                false
            }
        }
    }
}

/// The capability set every identity provider exposes.
///
/// Optional capabilities return `Ok(None)` rather than an error when a
/// provider has nothing to offer.
#[async_trait]
pub trait Provider: Send + Sync {
    fn data(&self) -> &ProviderData;

    fn login_url(&self, redirect_uri: &str, state: &str) -> String {
        self.data().authorization_url(redirect_uri, state)
    }

    async fn redeem(
        &self,
        redirect_uri: &str,
        code: &str,
    ) -> Result<SessionState, Report<ProviderError>> {
        self.data().redeem_code(redirect_uri, code).await
    }

    /// Resolves the session's email address, if the provider has one.
    async fn email_address(
        &self,
        _session: &SessionState,
    ) -> Result<Option<String>, Report<ProviderError>> {
        Ok(None)
    }

    /// Resolves a stable user name, if the provider has one.
    async fn user_name(
        &self,
        _session: &SessionState,
    ) -> Result<Option<String>, Report<ProviderError>> {
        Ok(None)
    }

    /// Liveness probe; `false` means the session must be dropped.
    async fn validate_session(&self, session: &SessionState) -> bool {
        self.data().validate_token(session.access_token(), false).await
    }

    /// Returns a replacement session when the provider refreshed tokens.
    ///
    /// `Ok(None)` means no refresh was needed or supported.
    async fn refresh_session_if_needed(
        &self,
        _session: &SessionState,
    ) -> Result<Option<SessionState>, Report<ProviderError>> {
        Ok(None)
    }

    /// Optional group or organisation gate.
    async fn validate_group(&self, _email: &str) -> bool {
        true
    }

    fn session_from_cookie(
        &self,
        value: &str,
        cipher: Option<&Cipher>,
    ) -> Result<SessionState, CookieError> {
        decode_session(value, cipher)
    }

    fn cookie_for_session(
        &self,
        session: &SessionState,
        cipher: Option<&Cipher>,
    ) -> Result<String, CookieError> {
        encode_session(session, cipher)
    }
}
