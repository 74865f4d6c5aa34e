//! Process-wide proxy state.
//!
//! Everything here is built once at startup and shared by reference between
//! requests. The only interior mutability lives in the reloadable credential
//! and email stores.

use std::sync::Arc;

use authgate_access::{CredentialStore, EmailValidator, RedirectValidator};
use authgate_cookie::{Cipher, CookieSigner, csrf_cookie_name, secret_bytes};
use authgate_providers::Provider;
use rootcause::prelude::Report;

use crate::config::Options;
use crate::error::ServerError;
use crate::proxy::UpstreamRegistry;

/// Paths served by the proxy itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPaths {
    pub robots: String,
    pub ping: String,
    pub sign_in: String,
    pub sign_out: String,
    pub start: String,
    pub callback: String,
    pub auth: String,
}

impl ProxyPaths {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            robots: "/robots.txt".to_string(),
            ping: "/ping".to_string(),
            sign_in: format!("{prefix}/sign_in"),
            sign_out: format!("{prefix}/sign_out"),
            start: format!("{prefix}/start"),
            callback: format!("{prefix}/callback"),
            auth: format!("{prefix}/auth"),
        }
    }
}

/// Shared state handed to every request.
pub struct ProxyState {
    pub options: Options,
    pub paths: ProxyPaths,
    pub provider: Arc<dyn Provider>,
    pub signer: CookieSigner,
    /// Present when tokens are stored in the cookie.
    pub cipher: Option<Cipher>,
    pub csrf_cookie_name: String,
    pub redirects: RedirectValidator,
    pub emails: Arc<EmailValidator>,
    pub credentials: Option<Arc<dyn CredentialStore>>,
    pub upstreams: UpstreamRegistry,
}

impl ProxyState {
    /// Assembles the proxy from validated options and loaded collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie keys or upstreams cannot be set up.
    pub fn new(
        options: Options,
        provider: Arc<dyn Provider>,
        emails: Arc<EmailValidator>,
        credentials: Option<Arc<dyn CredentialStore>>,
    ) -> Result<Self, Report<ServerError>> {
        let paths = ProxyPaths::new(&options.proxy_prefix);

        // Signatures use the secret as configured; only the cipher decodes it.
        let signer = CookieSigner::new(options.cookie.secret.as_bytes().to_vec()).map_err(|e| {
            ServerError::CookieKeys {
                reason: e.to_string(),
            }
        })?;
        let cipher = if options.pass_access_token || options.cookie.refresh.is_some() {
            let cipher = Cipher::new(&secret_bytes(&options.cookie.secret)).map_err(|e| {
                ServerError::CookieKeys {
                    reason: e.to_string(),
                }
            })?;
            Some(cipher)
        } else {
            None
        };

        let redirects = RedirectValidator::new(
            options.whitelist_domains.clone(),
            paths.sign_in.clone(),
            paths.start.clone(),
        )
        .map_err(|e| ServerError::Config {
            reason: e.to_string(),
        })?;

        let upstreams = UpstreamRegistry::new(&options)?;

        tracing::info!(
            provider = provider.data().name(),
            client_id = provider.data().client_id(),
            "configured provider"
        );
        tracing::info!(
            name = %options.cookie.name,
            secure = options.cookie.secure,
            http_only = options.cookie.http_only,
            expire = %options.cookie.expire,
            domain = options.cookie.domain.as_deref().unwrap_or_default(),
            path = %options.cookie.path,
            refresh = options.cookie.refresh.map(|r| r.to_string()).unwrap_or_else(|| "disabled".to_string()),
            "configured session cookie"
        );

        Ok(Self {
            csrf_cookie_name: csrf_cookie_name(&options.cookie.name),
            options,
            paths,
            provider,
            signer,
            cipher,
            redirects,
            emails,
            credentials,
            upstreams,
        })
    }

    /// Whether the sign-in page offers the username/password form.
    #[must_use]
    pub fn display_htpasswd_form(&self) -> bool {
        self.credentials.is_some() && self.options.display_htpasswd_form
    }

    /// Checks a username and password against the credential store.
    ///
    /// Password hashing (bcrypt in particular) runs on the blocking pool so
    /// the request's worker thread stays free. Returns false when no store is
    /// configured.
    pub async fn validate_credentials(&self, user: &str, password: &str) -> bool {
        let Some(store) = self.credentials.as_ref().map(Arc::clone) else {
            return false;
        };
        let (user, password) = (user.to_string(), password.to_string());
        match tokio::task::spawn_blocking(move || store.validate(&user, &password)).await {
            Ok(valid) => valid,
            Err(e) => {
                tracing::error!(error = %e, "credential check failed");
                false
            }
        }
    }
}
