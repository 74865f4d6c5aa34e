//! Centralized server configuration.
//!
//! [`ServerConfig`] is the raw, deserialized form loaded via the `config`
//! crate from an optional file and `AUTHGATE_*` environment variables.
//! [`ServerConfig::validate`] turns it into [`Options`], which holds only
//! parsed values and is shared for the life of the process.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use authgate_cookie::{AES_KEY_SIZES, secret_bytes};
use authgate_providers::{OidcSettings, ProviderConfig, ProviderKind, ProviderSettings};
use axum_extra::extract::cookie::SameSite;
use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::proxy::signature::SignatureKey;

/// Keys that accept comma-separated lists from the environment.
pub(crate) const LIST_KEYS: [&str; 5] = [
    "upstreams",
    "skip_auth_regex",
    "email_domains",
    "whitelist_domains",
    "gitlab_groups",
];

/// Longest accepted session cookie lifetime (ten years).
const MAX_COOKIE_EXPIRE_SECS: u64 = 315_360_000;

/// Raw server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    #[serde(default = "default_http_address")]
    pub http_address: String,

    /// Prefix for the control endpoints (`/start`, `/callback`, ...).
    #[serde(default = "default_proxy_prefix")]
    pub proxy_prefix: String,

    /// Upstream URLs: `http(s)://host[:port]/path` or `file:///dir#/mount`.
    #[serde(default)]
    pub upstreams: Vec<String>,

    /// Path patterns that bypass authentication.
    #[serde(default)]
    pub skip_auth_regex: Vec<String>,
    #[serde(default)]
    pub skip_auth_preflight: bool,
    #[serde(default)]
    pub skip_auth_strip_headers: bool,
    #[serde(default)]
    pub skip_provider_button: bool,

    /// Allowed email domains; `*` allows every address.
    #[serde(default)]
    pub email_domains: Vec<String>,
    /// Domains the post-login redirect may target.
    #[serde(default)]
    pub whitelist_domains: Vec<String>,
    #[serde(default)]
    pub authenticated_emails_file: Option<PathBuf>,
    #[serde(default)]
    pub htpasswd_file: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub display_htpasswd_form: bool,
    /// How often credential files are checked for changes, in seconds.
    #[serde(default = "default_credentials_poll_secs")]
    pub credentials_poll_secs: u64,

    #[serde(default)]
    pub cookie: CookieConfig,

    #[serde(default = "default_true")]
    pub pass_basic_auth: bool,
    #[serde(default)]
    pub basic_auth_password: String,
    #[serde(default)]
    pub pass_access_token: bool,
    #[serde(default = "default_true")]
    pub pass_user_headers: bool,
    #[serde(default = "default_true")]
    pub pass_host_header: bool,
    #[serde(default)]
    pub set_xauthrequest: bool,
    #[serde(default = "default_true")]
    pub proxy_websockets: bool,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// `algorithm:secret` used to sign proxied requests.
    #[serde(default)]
    pub signature_key: Option<String>,

    #[serde(default = "default_real_client_ip_header")]
    pub real_client_ip_header: String,

    /// Provider variant: `oauth2`, `oidc`, `gitlab`, `bitbucket` or `discord`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub login_url: Option<String>,
    #[serde(default)]
    pub redeem_url: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub validate_url: Option<String>,
    /// Callback URL registered with the provider. A bare path takes its
    /// host from each request.
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_approval_prompt")]
    pub approval_prompt: String,

    #[serde(default)]
    pub oidc_issuer_url: Option<String>,
    #[serde(default)]
    pub oidc_jwks_url: Option<String>,
    #[serde(default)]
    pub skip_oidc_discovery: bool,

    #[serde(default)]
    pub gitlab_groups: Vec<String>,
    #[serde(default)]
    pub bitbucket_team: Option<String>,
}

/// Session cookie settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_name")]
    pub name: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Cookie lifetime in seconds.
    #[serde(default = "default_cookie_expire_secs")]
    pub expire_secs: u64,
    /// Revalidate and re-issue cookies older than this; 0 disables.
    #[serde(default)]
    pub refresh_secs: u64,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default = "default_true")]
    pub http_only: bool,
    /// `lax`, `strict`, `none` or empty.
    #[serde(default)]
    pub same_site: String,
}

fn default_http_address() -> String {
    "127.0.0.1:4180".to_string()
}

fn default_proxy_prefix() -> String {
    "/oauth2".to_string()
}

fn default_true() -> bool {
    true
}

fn default_credentials_poll_secs() -> u64 {
    10
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_real_client_ip_header() -> String {
    "X-Real-IP".to_string()
}

fn default_provider() -> String {
    "oidc".to_string()
}

fn default_approval_prompt() -> String {
    "force".to_string()
}

fn default_cookie_name() -> String {
    "_oauth2_proxy".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_cookie_expire_secs() -> u64 {
    168 * 60 * 60
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            secret: String::new(),
            domain: None,
            path: default_cookie_path(),
            expire_secs: default_cookie_expire_secs(),
            refresh_secs: 0,
            secure: true,
            http_only: true,
            same_site: String::new(),
        }
    }
}

/// Validation failures, reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { messages: Vec<String> },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { messages } => {
                write!(f, "Invalid configuration:")?;
                for message in messages {
                    write!(f, "\n  {message}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where the provider sends the browser back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackUrl {
    /// Fully qualified; used as is.
    Absolute(Url),
    /// Host-relative path; completed from each request.
    Relative(String),
}

/// Validated session cookie settings.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub name: String,
    pub secret: String,
    pub domain: Option<String>,
    pub path: String,
    pub expire: chrono::Duration,
    /// `None` disables periodic revalidation.
    pub refresh: Option<chrono::Duration>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

/// Validated, immutable proxy settings.
#[derive(Debug, Clone)]
pub struct Options {
    pub http_address: String,
    pub proxy_prefix: String,
    pub upstreams: Vec<Url>,
    pub skip_auth_regex: Vec<Regex>,
    pub skip_auth_preflight: bool,
    pub skip_auth_strip_headers: bool,
    pub skip_provider_button: bool,
    pub email_domains: Vec<String>,
    pub whitelist_domains: Vec<String>,
    pub authenticated_emails_file: Option<PathBuf>,
    pub htpasswd_file: Option<PathBuf>,
    pub display_htpasswd_form: bool,
    pub credentials_poll_interval: Duration,
    pub cookie: CookieOptions,
    pub pass_basic_auth: bool,
    pub basic_auth_password: String,
    pub pass_access_token: bool,
    pub pass_user_headers: bool,
    pub pass_host_header: bool,
    pub set_xauthrequest: bool,
    pub proxy_websockets: bool,
    pub flush_interval: Duration,
    pub signature_key: Option<SignatureKey>,
    pub real_client_ip_header: String,
    pub callback_url: CallbackUrl,
    pub provider: ProviderSettings,
}

impl ServerConfig {
    /// Loads configuration from an optional file, then `AUTHGATE_*`
    /// environment variables (nested keys separated by `__`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file));
        }
        let mut environment = config::Environment::with_prefix("AUTHGATE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",");
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }
        builder.add_source(environment).build()?.try_deserialize()
    }

    /// Checks every setting and resolves derived values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` listing every problem found.
    pub fn validate(&self) -> Result<Options, ConfigError> {
        let mut messages = Vec::new();

        for (value, name) in [
            (&self.cookie.secret, "cookie-secret"),
            (&self.client_id, "client-id"),
            (&self.client_secret, "client-secret"),
        ] {
            if value.is_empty() {
                messages.push(format!("missing setting: {name}"));
            }
        }

        let cookie = self.validate_cookie(&mut messages);

        let upstreams = self
            .upstreams
            .iter()
            .filter_map(|upstream| match Url::parse(upstream) {
                Ok(url) if matches!(url.scheme(), "http" | "https" | "file") => Some(url),
                Ok(url) => {
                    messages.push(format!("unsupported upstream scheme {:?}: {upstream}", url.scheme()));
                    None
                }
                Err(e) => {
                    messages.push(format!("error parsing upstream: {e}"));
                    None
                }
            })
            .collect();

        let skip_auth_regex = self
            .skip_auth_regex
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    messages.push(format!("error compiling regex={pattern:?} {e}"));
                    None
                }
            })
            .collect();

        let signature_key = match self.signature_key.as_deref() {
            None | Some("") => None,
            Some(value) => match value.parse::<SignatureKey>() {
                Ok(key) => Some(key),
                Err(e) => {
                    messages.push(e.to_string());
                    None
                }
            },
        };

        let callback_url = self.callback_url(&mut messages);
        let provider = self.provider_settings(&mut messages);

        if !messages.is_empty() {
            return Err(ConfigError::Invalid { messages });
        }

        Ok(Options {
            http_address: self.http_address.clone(),
            proxy_prefix: self.proxy_prefix.clone(),
            upstreams,
            skip_auth_regex,
            skip_auth_preflight: self.skip_auth_preflight,
            skip_auth_strip_headers: self.skip_auth_strip_headers,
            skip_provider_button: self.skip_provider_button,
            email_domains: self.email_domains.clone(),
            whitelist_domains: self.whitelist_domains.clone(),
            authenticated_emails_file: self.authenticated_emails_file.clone(),
            htpasswd_file: self.htpasswd_file.clone(),
            display_htpasswd_form: self.display_htpasswd_form,
            credentials_poll_interval: Duration::from_secs(self.credentials_poll_secs.max(1)),
            cookie,
            pass_basic_auth: self.pass_basic_auth,
            basic_auth_password: self.basic_auth_password.clone(),
            pass_access_token: self.pass_access_token,
            pass_user_headers: self.pass_user_headers,
            pass_host_header: self.pass_host_header,
            set_xauthrequest: self.set_xauthrequest,
            proxy_websockets: self.proxy_websockets,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            signature_key,
            real_client_ip_header: self.real_client_ip_header.clone(),
            callback_url,
            provider,
        })
    }

    fn validate_cookie(&self, messages: &mut Vec<String>) -> CookieOptions {
        let cookie = &self.cookie;

        if !is_cookie_token(&cookie.name) {
            messages.push(format!("invalid cookie name: {:?}", cookie.name));
        }

        if cookie.expire_secs > MAX_COOKIE_EXPIRE_SECS {
            messages.push(format!(
                "cookie_expire ({}s) must not exceed {MAX_COOKIE_EXPIRE_SECS}s",
                cookie.expire_secs
            ));
        }

        if cookie.refresh_secs >= cookie.expire_secs {
            messages.push(format!(
                "cookie_refresh ({}s) must be less than cookie_expire ({}s)",
                cookie.refresh_secs, cookie.expire_secs
            ));
        }

        if (self.pass_access_token || cookie.refresh_secs > 0) && !cookie.secret.is_empty() {
            let len = secret_bytes(&cookie.secret).len();
            if !AES_KEY_SIZES.contains(&len) {
                messages.push(format!(
                    "cookie_secret must be 16, 24, or 32 bytes to create an AES cipher when \
                     pass_access_token == true or cookie_refresh != 0, but is {len} bytes"
                ));
            }
        }

        let same_site = match cookie.same_site.to_ascii_lowercase().as_str() {
            "" => None,
            "lax" => Some(SameSite::Lax),
            "strict" => Some(SameSite::Strict),
            "none" => Some(SameSite::None),
            other => {
                messages.push(format!("invalid cookie_samesite: {other:?}"));
                None
            }
        };

        CookieOptions {
            name: cookie.name.clone(),
            secret: cookie.secret.clone(),
            domain: cookie.domain.clone().filter(|d| !d.is_empty()),
            path: cookie.path.clone(),
            expire: seconds(cookie.expire_secs),
            refresh: (cookie.refresh_secs > 0).then(|| seconds(cookie.refresh_secs)),
            secure: cookie.secure,
            http_only: cookie.http_only,
            same_site,
        }
    }

    fn callback_url(&self, messages: &mut Vec<String>) -> CallbackUrl {
        let default_path = format!("{}/callback", self.proxy_prefix);
        let Some(raw) = self.redirect_url.as_deref().filter(|r| !r.is_empty()) else {
            return CallbackUrl::Relative(default_path);
        };

        match Url::parse(raw) {
            Ok(mut url) if url.has_host() => {
                if url.path() == "/" && !raw.ends_with('/') {
                    url.set_path(&default_path);
                }
                CallbackUrl::Absolute(url)
            }
            Ok(_) => {
                messages.push(format!("error parsing redirect-url={raw:?}: missing host"));
                CallbackUrl::Relative(default_path)
            }
            Err(url::ParseError::RelativeUrlWithoutBase) if raw.starts_with('/') => {
                CallbackUrl::Relative(raw.to_string())
            }
            Err(e) => {
                messages.push(format!("error parsing redirect-url={raw:?} {e}"));
                CallbackUrl::Relative(default_path)
            }
        }
    }

    fn provider_settings(&self, messages: &mut Vec<String>) -> ProviderSettings {
        let kind = self.provider.parse::<ProviderKind>().unwrap_or_else(|e| {
            messages.push(e.to_string());
            ProviderKind::default()
        });

        let mut parse = |value: &Option<String>, name: &str| -> Option<Url> {
            let raw = value.as_deref().filter(|v| !v.is_empty())?;
            match Url::parse(raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    messages.push(format!("error parsing {name}={raw:?} {e}"));
                    None
                }
            }
        };

        let config = ProviderConfig {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            login_url: parse(&self.login_url, "login-url"),
            redeem_url: parse(&self.redeem_url, "redeem-url"),
            profile_url: parse(&self.profile_url, "profile-url"),
            validate_url: parse(&self.validate_url, "validate-url"),
            scope: self.scope.clone().filter(|s| !s.is_empty()),
            approval_prompt: self.approval_prompt.clone(),
        };
        let jwks_url = parse(&self.oidc_jwks_url, "oidc-jwks-url");

        let oidc = if kind == ProviderKind::Oidc {
            let issuer_url = self.oidc_issuer_url.clone().filter(|u| !u.is_empty());
            if issuer_url.is_none() {
                messages.push("missing setting: oidc-issuer-url".to_string());
            }
            if self.skip_oidc_discovery {
                for (present, name) in [
                    (config.login_url.is_some(), "login-url"),
                    (config.redeem_url.is_some(), "redeem-url"),
                    (jwks_url.is_some(), "oidc-jwks-url"),
                ] {
                    if !present {
                        messages.push(format!("missing setting: {name}"));
                    }
                }
            }
            issuer_url.map(|issuer_url| OidcSettings {
                issuer_url,
                jwks_url,
                skip_discovery: self.skip_oidc_discovery,
            })
        } else {
            None
        };

        ProviderSettings {
            kind,
            config,
            oidc,
            gitlab_groups: self.gitlab_groups.clone(),
            bitbucket_team: self.bitbucket_team.clone().filter(|t| !t.is_empty()),
        }
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

/// RFC 6265 cookie-name token: visible ASCII without separators.
fn is_cookie_token(name: &str) -> bool {
    const SEPARATORS: &str = "()<>@,;:\\\"/[]?={} \t";
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_graphic() && !SEPARATORS.contains(c))
}
