//! Local credential validation for HTTP Basic auth and the sign-in form.
//!
//! Credentials come from an htpasswd file. Only `{SHA}` (base64 SHA-1) and
//! bcrypt (`$2a$`, `$2b$`, `$2y$`) entries are understood; other lines are
//! skipped with a warning.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rootcause::prelude::Report;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::AccessError;

/// A source of local username/password credentials.
pub trait CredentialStore: Send + Sync {
    /// Returns true when `password` is correct for `user`.
    fn validate(&self, user: &str, password: &str) -> bool;
}

/// Credentials loaded from an htpasswd file.
#[derive(Debug)]
pub struct HtpasswdFile {
    path: PathBuf,
    users: RwLock<HashMap<String, String>>,
}

impl HtpasswdFile {
    /// Loads an htpasswd file.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::FileUnreadable` if the file cannot be read.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, Report<AccessError>> {
        let file = Self {
            path: path.into(),
            users: RwLock::new(HashMap::new()),
        };
        file.reload()?;
        Ok(file)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file, replacing the loaded credentials.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::FileUnreadable` if the file cannot be read; the
    /// previously loaded credentials stay in effect.
    pub fn reload(&self) -> Result<(), Report<AccessError>> {
        let contents = fs::read_to_string(&self.path).map_err(|e| AccessError::FileUnreadable {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let users = parse(&contents);
        tracing::info!(path = %self.path.display(), users = users.len(), "loaded htpasswd file");
        if let Ok(mut guard) = self.users.write() {
            *guard = users;
        }
        Ok(())
    }
}

impl CredentialStore for HtpasswdFile {
    fn validate(&self, user: &str, password: &str) -> bool {
        let Ok(users) = self.users.read() else {
            return false;
        };
        let Some(hash) = users.get(user) else {
            return false;
        };
        if let Some(digest) = hash.strip_prefix("{SHA}") {
            return STANDARD.encode(Sha1::digest(password.as_bytes())) == digest;
        }
        if is_bcrypt(hash) {
            return bcrypt::verify(password, hash).unwrap_or(false);
        }
        false
    }
}

fn is_bcrypt(hash: &str) -> bool {
    ["$2a$", "$2b$", "$2y$"]
        .iter()
        .any(|prefix| hash.starts_with(prefix))
}

fn parse(contents: &str) -> HashMap<String, String> {
    let mut users = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((user, hash)) = line.split_once(':') else {
            tracing::warn!(line, "skipping malformed htpasswd line");
            continue;
        };
        if !hash.starts_with("{SHA}") && !is_bcrypt(hash) {
            tracing::warn!(user, "skipping htpasswd entry with unsupported hash");
            continue;
        }
        users.insert(user.to_string(), hash.to_string());
    }
    users
}
