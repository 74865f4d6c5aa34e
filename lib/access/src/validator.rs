//! The email authorization predicate.
//!
//! An email is allowed when its domain is in the configured domain list,
//! when it appears in the authenticated-emails file, or when the domain list
//! contains `*`.

use rootcause::prelude::Report;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::AccessError;

/// Decides which email addresses may hold a session.
#[derive(Debug)]
pub struct EmailValidator {
    domain_suffixes: Vec<String>,
    allow_all: bool,
    emails_file: Option<PathBuf>,
    emails: RwLock<HashSet<String>>,
}

impl EmailValidator {
    /// Creates a validator from a domain list.
    ///
    /// Domains are matched case-insensitively against the part after `@`.
    #[must_use]
    pub fn new(domains: &[String]) -> Self {
        let allow_all = domains.iter().any(|d| d == "*");
        let domain_suffixes = domains
            .iter()
            .filter(|d| *d != "*")
            .map(|d| format!("@{}", d.trim_start_matches('@').to_lowercase()))
            .collect();
        Self {
            domain_suffixes,
            allow_all,
            emails_file: None,
            emails: RwLock::new(HashSet::new()),
        }
    }

    /// Adds an authenticated-emails file with one address per line.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::FileUnreadable` if the file cannot be read.
    pub fn with_emails_file(mut self, path: impl Into<PathBuf>) -> Result<Self, Report<AccessError>> {
        self.emails_file = Some(path.into());
        self.reload()?;
        Ok(self)
    }

    /// The authenticated-emails file, if one is configured.
    #[must_use]
    pub fn emails_file(&self) -> Option<&Path> {
        self.emails_file.as_deref()
    }

    /// Re-reads the authenticated-emails file, replacing the loaded set.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::FileUnreadable` if the file cannot be read; the
    /// previously loaded set stays in effect.
    pub fn reload(&self) -> Result<(), Report<AccessError>> {
        let Some(path) = &self.emails_file else {
            return Ok(());
        };
        let contents = fs::read_to_string(path).map_err(|e| AccessError::FileUnreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let emails: HashSet<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_lowercase)
            .collect();
        tracing::info!(path = %path.display(), count = emails.len(), "loaded authenticated emails");
        if let Ok(mut guard) = self.emails.write() {
            *guard = emails;
        }
        Ok(())
    }

    /// Returns true when `email` is authorized.
    #[must_use]
    pub fn is_allowed(&self, email: &str) -> bool {
        if self.allow_all {
            return true;
        }
        let email = email.to_lowercase();
        if self.domain_suffixes.iter().any(|suffix| email.ends_with(suffix)) {
            return true;
        }
        self.emails
            .read()
            .map(|emails| emails.contains(&email))
            .unwrap_or(false)
    }
}
