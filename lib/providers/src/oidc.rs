//! OpenID Connect provider.
//!
//! Endpoints come from issuer discovery unless discovery is skipped, in which
//! case login, redeem and JWKS URLs must all be configured. Every token
//! response must carry an `id_token` whose signature, issuer and audience
//! verify against the provider's keys; its email claim becomes the session
//! identity.

use async_trait::async_trait;
use authgate_core::SessionState;
use chrono::{DateTime, Utc};
use openidconnect::core::{
    CoreClient, CoreIdTokenVerifier, CoreJsonWebKeySet, CoreProviderMetadata, CoreTokenResponse,
};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, IssuerUrl, JsonWebKeySetUrl, Nonce,
    OAuth2TokenResponse, RedirectUrl, RefreshToken, TokenResponse, TokenUrl,
};
use rootcause::prelude::Report;
use url::Url;

use crate::error::ProviderError;
use crate::provider::{Endpoints, Provider, ProviderConfig, ProviderData};

const DEFAULT_SCOPE: &str = "openid email profile";
const NAME: &str = "OpenID Connect";

/// How an OIDC provider locates its issuer metadata.
#[derive(Debug, Clone)]
pub struct OidcSettings {
    pub issuer_url: String,
    pub jwks_url: Option<Url>,
    pub skip_discovery: bool,
}

/// Provider backed by an OpenID Connect issuer.
#[derive(Debug, Clone)]
pub struct OidcProvider {
    data: ProviderData,
    issuer: IssuerUrl,
    key_set: CoreJsonWebKeySet,
}

impl OidcProvider {
    /// Discovers (or loads) issuer metadata and signing keys.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` when discovery or the key fetch
    /// fails, or when skipping discovery without the required URLs.
    pub async fn new(
        config: &ProviderConfig,
        settings: &OidcSettings,
    ) -> Result<Self, Report<ProviderError>> {
        let issuer =
            IssuerUrl::new(settings.issuer_url.clone()).map_err(|e| ProviderError::Configuration {
                reason: format!("invalid issuer url {}: {e}", settings.issuer_url),
            })?;

        if settings.skip_discovery {
            let data = ProviderData::resolve(NAME, config, Endpoints::default(), DEFAULT_SCOPE)?;
            let jwks_url = settings
                .jwks_url
                .clone()
                .ok_or_else(|| ProviderError::Configuration {
                    reason: "skipping discovery requires a JWKS url".to_string(),
                })?;
            let key_set =
                CoreJsonWebKeySet::fetch_async(&JsonWebKeySetUrl::from_url(jwks_url), data.http())
                    .await
                    .map_err(|e| ProviderError::Configuration {
                        reason: format!("failed to fetch signing keys: {e}"),
                    })?;
            return Ok(Self::from_parts(data, issuer, key_set));
        }

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProviderError::Configuration {
                reason: format!("failed to create HTTP client: {e}"),
            })?;
        let metadata = CoreProviderMetadata::discover_async(issuer, &http)
            .await
            .map_err(|e| ProviderError::Configuration {
                reason: format!("failed to discover {}: {e}", settings.issuer_url),
            })?;
        tracing::info!(issuer = %settings.issuer_url, "discovered OIDC provider");

        let defaults = Endpoints {
            login_url: Some(metadata.authorization_endpoint().url().clone()),
            redeem_url: metadata.token_endpoint().map(|u| u.url().clone()),
            ..Endpoints::default()
        };
        let data = ProviderData::resolve(NAME, config, defaults, DEFAULT_SCOPE)?;
        Ok(Self::from_parts(
            data,
            metadata.issuer().clone(),
            metadata.jwks().clone(),
        ))
    }

    /// Assembles a provider from already-resolved parts.
    #[must_use]
    pub fn from_parts(data: ProviderData, issuer: IssuerUrl, key_set: CoreJsonWebKeySet) -> Self {
        Self {
            data,
            issuer,
            key_set,
        }
    }

    async fn exchange(
        &self,
        grant: Grant<'_>,
    ) -> Result<(CoreTokenResponse, String), Report<ProviderError>> {
        let client = CoreClient::new(
            ClientId::new(self.data.client_id().to_string()),
            self.issuer.clone(),
            self.key_set.clone(),
        )
        .set_client_secret(ClientSecret::new(self.data.client_secret().to_string()))
        .set_token_uri(TokenUrl::from_url(self.data.redeem_url().clone()));

        let token = match grant {
            Grant::Code { redirect_uri, code } => {
                let redirect_uri = RedirectUrl::new(redirect_uri.to_string()).map_err(|e| {
                    ProviderError::Redemption {
                        reason: format!("invalid redirect uri: {e}"),
                    }
                })?;
                client
                    .clone()
                    .set_redirect_uri(redirect_uri)
                    .exchange_code(AuthorizationCode::new(code.to_string()))
                    .request_async(self.data.http())
                    .await
            }
            Grant::Refresh(token) => {
                client
                    .exchange_refresh_token(&RefreshToken::new(token.to_string()))
                    .request_async(self.data.http())
                    .await
            }
        }
        .map_err(|e| ProviderError::Redemption {
            reason: e.to_string(),
        })?;

        let email = verified_email(&client.id_token_verifier(), &token)?;
        Ok((token, email))
    }
}

enum Grant<'a> {
    Code { redirect_uri: &'a str, code: &'a str },
    Refresh(&'a str),
}

/// Picks the session identity out of verified token claims.
///
/// The email claim is preferred, falling back to the subject. An explicit
/// `email_verified: false` rejects the login.
fn identity_from_claims(
    subject: &str,
    email: Option<&str>,
    email_verified: Option<bool>,
) -> Result<String, ProviderError> {
    let Some(email) = email.filter(|e| !e.is_empty()) else {
        return Ok(subject.to_string());
    };
    if email_verified == Some(false) {
        return Err(ProviderError::UnverifiedEmail {
            email: email.to_string(),
        });
    }
    Ok(email.to_string())
}

fn verified_email(
    verifier: &CoreIdTokenVerifier<'_>,
    token: &CoreTokenResponse,
) -> Result<String, Report<ProviderError>> {
    let id_token = token
        .id_token()
        .ok_or_else(|| ProviderError::MissingField {
            field: "id_token".to_string(),
        })?;
    let claims = id_token
        .claims(verifier, |_: Option<&Nonce>| Ok::<(), String>(()))
        .map_err(|e| ProviderError::TokenVerification {
            reason: e.to_string(),
        })?;
    Ok(identity_from_claims(
        claims.subject().as_str(),
        claims.email().map(|e| e.as_str()),
        claims.email_verified(),
    )?)
}

fn expires_on(token: &CoreTokenResponse, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    token
        .expires_in()
        .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .and_then(|ttl| now.checked_add_signed(ttl))
}

/// A session carrying a refresh token needs refreshing unless its access
/// token is known to be valid past `now`.
fn needs_refresh(session: &SessionState, now: DateTime<Utc>) -> bool {
    session.refresh_token().is_some() && !session.expires_on().is_some_and(|t| t > now)
}

#[async_trait]
impl Provider for OidcProvider {
    fn data(&self) -> &ProviderData {
        &self.data
    }

    async fn redeem(
        &self,
        redirect_uri: &str,
        code: &str,
    ) -> Result<SessionState, Report<ProviderError>> {
        if code.is_empty() {
            return Err(ProviderError::MissingCode.into());
        }
        let (token, email) = self
            .exchange(Grant::Code { redirect_uri, code })
            .await?;

        Ok(SessionState::new()
            .with_email(email)
            .with_access_token(token.access_token().secret().clone())
            .with_refresh_token(
                token
                    .refresh_token()
                    .map(|t| t.secret().clone())
                    .unwrap_or_default(),
            )
            .with_expires_on(expires_on(&token, Utc::now())))
    }

    async fn email_address(
        &self,
        session: &SessionState,
    ) -> Result<Option<String>, Report<ProviderError>> {
        Ok(session.email().map(str::to_string))
    }

    async fn validate_session(&self, session: &SessionState) -> bool {
        if self.data.validate_url().is_some() {
            return self
                .data
                .validate_token(session.access_token(), true)
                .await;
        }
        !session.is_expired()
    }

    async fn refresh_session_if_needed(
        &self,
        session: &SessionState,
    ) -> Result<Option<SessionState>, Report<ProviderError>> {
        let now = Utc::now();
        let Some(refresh_token) = session.refresh_token() else {
            return Ok(None);
        };
        if !needs_refresh(session, now) {
            return Ok(None);
        }

        let (token, email) = self.exchange(Grant::Refresh(refresh_token)).await?;
        let refreshed = SessionState::new()
            .with_user(session.user().unwrap_or_default())
            .with_email(email)
            .with_access_token(token.access_token().secret().clone())
            .with_refresh_token(
                token
                    .refresh_token()
                    .map_or_else(|| refresh_token.to_string(), |t| t.secret().clone()),
            )
            .with_expires_on(expires_on(&token, now));
        tracing::info!(session = %refreshed, "refreshed access token");
        Ok(Some(refreshed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> ProviderConfig {
        ProviderConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            ..ProviderConfig::default()
        }
    }

    async fn mount_issuer(server: &MockServer) {
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": base,
                "authorization_endpoint": format!("{base}/authorize"),
                "token_endpoint": format!("{base}/token"),
                "jwks_uri": format!("{base}/keys"),
                "response_types_supported": ["code"],
                "subject_types_supported": ["public"],
                "id_token_signing_alg_values_supported": ["RS256"]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"keys": []})))
            .mount(server)
            .await;
    }

    #[test]
    fn identity_falls_back_to_subject() {
        assert_eq!(
            identity_from_claims("123456789", None, None).expect("subject"),
            "123456789"
        );
    }

    fn token_expiring_in(seconds: u64) -> CoreTokenResponse {
        serde_json::from_value(serde_json::json!({
            "access_token": "access",
            "token_type": "bearer",
            "expires_in": seconds
        }))
        .expect("token response")
    }

    #[test]
    fn expiry_follows_expires_in() {
        let now = Utc::now();
        assert_eq!(
            expires_on(&token_expiring_in(3600), now),
            Some(now + chrono::Duration::hours(1))
        );
    }

    #[test]
    fn out_of_range_expires_in_means_no_expiry() {
        assert_eq!(expires_on(&token_expiring_in(10_000_000_000_000), Utc::now()), None);
    }

    #[test]
    fn identity_rejects_unverified_email() {
        assert_eq!(
            identity_from_claims("123456789", Some("eve@example.com"), Some(false)),
            Err(ProviderError::UnverifiedEmail {
                email: "eve@example.com".to_string()
            })
        );
    }

    #[test]
    fn identity_accepts_verified_or_unspecified_email() {
        assert_eq!(
            identity_from_claims("1", Some("bob@example.com"), Some(true)).expect("verified"),
            "bob@example.com"
        );
        assert_eq!(
            identity_from_claims("1", Some("bob@example.com"), None).expect("unspecified"),
            "bob@example.com"
        );
    }

    #[test]
    fn refresh_when_not_known_fresh() {
        let now = Utc::now();
        let expired = SessionState::new()
            .with_refresh_token("refresh")
            .with_expires_on(Some(now - chrono::Duration::minutes(1)));
        let fresh = SessionState::new()
            .with_refresh_token("refresh")
            .with_expires_on(Some(now + chrono::Duration::minutes(5)));
        let no_expiry = SessionState::new().with_refresh_token("refresh");
        let no_refresh = SessionState::new().with_expires_on(Some(now - chrono::Duration::minutes(1)));

        assert!(needs_refresh(&expired, now));
        assert!(needs_refresh(&no_expiry, now));
        assert!(!needs_refresh(&fresh, now));
        assert!(!needs_refresh(&no_refresh, now));
    }

    #[tokio::test]
    async fn discovery_supplies_endpoints() {
        let server = MockServer::start().await;
        mount_issuer(&server).await;

        let settings = OidcSettings {
            issuer_url: server.uri(),
            jwks_url: None,
            skip_discovery: false,
        };
        let provider = OidcProvider::new(&config(), &settings).await.expect("provider");
        assert_eq!(
            provider.data().login_url().as_str(),
            format!("{}/authorize", server.uri())
        );
        assert_eq!(
            provider.data().redeem_url().as_str(),
            format!("{}/token", server.uri())
        );
        assert_eq!(provider.data().scope(), DEFAULT_SCOPE);
    }

    #[tokio::test]
    async fn skipping_discovery_requires_jwks_url() {
        let mut cfg = config();
        cfg.login_url = Some(Url::parse("https://idp.example.com/authorize").expect("url"));
        cfg.redeem_url = Some(Url::parse("https://idp.example.com/token").expect("url"));
        let settings = OidcSettings {
            issuer_url: "https://idp.example.com".to_string(),
            jwks_url: None,
            skip_discovery: true,
        };
        assert!(OidcProvider::new(&cfg, &settings).await.is_err());
    }

    #[tokio::test]
    async fn redeem_without_id_token_fails() {
        let server = MockServer::start().await;
        mount_issuer(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a1234",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let settings = OidcSettings {
            issuer_url: server.uri(),
            jwks_url: None,
            skip_discovery: false,
        };
        let provider = OidcProvider::new(&config(), &settings).await.expect("provider");
        let result = provider.redeem("https://app/oauth2/callback", "code").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn refresh_is_skipped_for_fresh_sessions() {
        let server = MockServer::start().await;
        mount_issuer(&server).await;
        let settings = OidcSettings {
            issuer_url: server.uri(),
            jwks_url: None,
            skip_discovery: false,
        };
        let provider = OidcProvider::new(&config(), &settings).await.expect("provider");

        let session = SessionState::new()
            .with_email("bob@example.com")
            .with_refresh_token("refresh")
            .with_expires_on(Some(Utc::now() + chrono::Duration::hours(1)));
        assert_eq!(
            provider
                .refresh_session_if_needed(&session)
                .await
                .expect("refresh"),
            None
        );
    }
}
