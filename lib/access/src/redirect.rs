//! Post-login redirect validation.
//!
//! Redirect targets come from user input (`rd`, a header, or the OAuth
//! `state`), so only path-absolute targets and whitelisted external hosts
//! are allowed.

use regex::Regex;
use url::Url;

use crate::error::AccessError;

/// Matches `//`, `/\`, `/ /`, `/./\` and similar open-redirect tricks.
const TRICKY_PREFIX: &str = r"[/\\](?:[\s\v]*|\.\.?)[/\\]";

/// Classifies redirect targets as safe or unsafe.
#[derive(Debug, Clone)]
pub struct RedirectValidator {
    whitelist_domains: Vec<String>,
    sign_in_path: String,
    start_path: String,
    tricky_prefix: Regex,
    base: Url,
}

impl RedirectValidator {
    /// Creates a validator.
    ///
    /// `whitelist_domains` entries match a host exactly, or as a suffix when
    /// they start with `.`.
    ///
    /// # Errors
    ///
    /// Returns an error if the built-in patterns fail to compile.
    pub fn new(
        whitelist_domains: Vec<String>,
        sign_in_path: impl Into<String>,
        start_path: impl Into<String>,
    ) -> Result<Self, AccessError> {
        let tricky_prefix = Regex::new(TRICKY_PREFIX).map_err(|e| AccessError::InvalidPattern {
            pattern: TRICKY_PREFIX.to_string(),
            reason: e.to_string(),
        })?;
        let base = Url::parse("http://localhost/").map_err(|e| AccessError::InvalidPattern {
            pattern: "http://localhost/".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            whitelist_domains,
            sign_in_path: sign_in_path.into(),
            start_path: start_path.into(),
            tricky_prefix,
            base,
        })
    }

    /// Returns true when `redirect` is safe to send the browser to.
    #[must_use]
    pub fn is_valid(&self, redirect: &str) -> bool {
        let path_absolute = redirect.starts_with('/');
        let parsed = if path_absolute {
            self.base.join(redirect)
        } else {
            Url::parse(redirect)
        };
        let Ok(url) = parsed else {
            tracing::info!(redirect, "invalid redirect: failed to parse url");
            return false;
        };

        if url.path() == self.sign_in_path || url.path() == self.start_path {
            tracing::info!(redirect, "invalid redirect: is auth start or sign_in path");
            return false;
        }

        if path_absolute {
            if self.tricky_prefix.is_match(redirect) {
                tracing::info!(redirect, "invalid redirect: tricky prefix");
                return false;
            }
            return true;
        }

        if redirect.starts_with("http://") || redirect.starts_with("https://") {
            let host = match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                (None, _) => String::new(),
            };
            if self.is_whitelisted_host(&host) {
                return true;
            }
            tracing::info!(redirect, "invalid redirect: domain not in whitelist");
        }
        false
    }

    fn is_whitelisted_host(&self, host: &str) -> bool {
        self.whitelist_domains
            .iter()
            .any(|domain| host == domain || (domain.starts_with('.') && host.ends_with(domain.as_str())))
    }
}
