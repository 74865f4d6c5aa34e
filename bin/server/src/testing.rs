//! Fixtures shared by the server's unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use authgate_access::{CredentialStore, EmailValidator};
use authgate_core::SessionState;
use authgate_providers::{Endpoints, Provider, ProviderConfig, ProviderData, ProviderError};
use rootcause::prelude::Report;
use url::Url;

use crate::config::{LIST_KEYS, ServerConfig};
use crate::state::ProxyState;

/// What the fake provider does when asked to refresh.
#[derive(Debug, Clone)]
pub enum Refresh {
    NotNeeded,
    /// Reports success without changing the session.
    Unchanged,
    Replace(SessionState),
    Fail,
}

/// A scriptable provider.
#[derive(Clone)]
pub struct FakeProvider {
    data: ProviderData,
    pub refresh: Refresh,
    pub session_valid: bool,
    pub group_valid: bool,
    /// `None` makes redemption fail.
    pub redeemed: Option<SessionState>,
    pub email: Option<String>,
    pub validations: Arc<AtomicUsize>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        let config = ProviderConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            login_url: Some(Url::parse("https://provider.example.com/oauth/authorize").expect("url")),
            redeem_url: Some(Url::parse("https://provider.example.com/oauth/token").expect("url")),
            approval_prompt: "force".to_string(),
            ..ProviderConfig::default()
        };
        Self {
            data: ProviderData::resolve("Fake", &config, Endpoints::default(), "profile email")
                .expect("provider data"),
            refresh: Refresh::NotNeeded,
            session_valid: true,
            group_valid: true,
            redeemed: None,
            email: None,
            validations: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FakeProvider {
    pub fn with_refresh(mut self, refresh: Refresh) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_session_valid(mut self, valid: bool) -> Self {
        self.session_valid = valid;
        self
    }

    pub fn with_group_valid(mut self, valid: bool) -> Self {
        self.group_valid = valid;
        self
    }

    pub fn with_redeemed(mut self, session: SessionState) -> Self {
        self.redeemed = Some(session);
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn validation_count(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn data(&self) -> &ProviderData {
        &self.data
    }

    async fn redeem(
        &self,
        _redirect_uri: &str,
        code: &str,
    ) -> Result<SessionState, Report<ProviderError>> {
        if code.is_empty() {
            return Err(ProviderError::MissingCode.into());
        }
        self.redeemed.clone().ok_or_else(|| {
            ProviderError::Redemption {
                reason: "scripted failure".to_string(),
            }
            .into()
        })
    }

    async fn email_address(
        &self,
        _session: &SessionState,
    ) -> Result<Option<String>, Report<ProviderError>> {
        Ok(self.email.clone())
    }

    async fn validate_session(&self, _session: &SessionState) -> bool {
        self.validations.fetch_add(1, Ordering::SeqCst);
        self.session_valid
    }

    async fn refresh_session_if_needed(
        &self,
        session: &SessionState,
    ) -> Result<Option<SessionState>, Report<ProviderError>> {
        match &self.refresh {
            Refresh::NotNeeded => Ok(None),
            Refresh::Unchanged => Ok(Some(session.clone())),
            Refresh::Replace(replacement) => Ok(Some(replacement.clone())),
            Refresh::Fail => Err(ProviderError::Redemption {
                reason: "refresh token revoked".to_string(),
            }
            .into()),
        }
    }

    async fn validate_group(&self, _email: &str) -> bool {
        self.group_valid
    }
}

/// Accepts a fixed set of username/password pairs.
pub struct StaticCredentials(pub Vec<(&'static str, &'static str)>);

impl CredentialStore for StaticCredentials {
    fn validate(&self, user: &str, password: &str) -> bool {
        self.0.iter().any(|(u, p)| *u == user && *p == password)
    }
}

/// Validated options with test defaults, overridden by `pairs`.
pub fn options(pairs: &[(&str, &str)]) -> crate::config::Options {
    let defaults = [
        ("cookie.secret", "0123456789abcdef"),
        ("client_id", "client"),
        ("client_secret", "secret"),
        ("provider", "discord"),
        ("upstreams", "http://127.0.0.1:8080/"),
        ("email_domains", "*"),
    ];
    let mut builder = config::Config::builder();
    for (key, value) in defaults.iter().chain(pairs) {
        builder = if LIST_KEYS.contains(key) {
            let list: Vec<String> = value.split(',').map(str::to_string).collect();
            builder.set_override(*key, list).expect("override")
        } else {
            builder.set_override(*key, *value).expect("override")
        };
    }
    let config: ServerConfig = builder
        .build()
        .expect("build")
        .try_deserialize()
        .expect("deserialize");
    config.validate().expect("valid options")
}

/// A full proxy state around `provider`.
pub fn proxy_state(
    pairs: &[(&str, &str)],
    provider: FakeProvider,
    credentials: Option<Arc<dyn CredentialStore>>,
) -> ProxyState {
    let options = options(pairs);
    let emails = Arc::new(EmailValidator::new(&options.email_domains));
    ProxyState::new(options, Arc::new(provider), emails, credentials).expect("proxy state")
}
