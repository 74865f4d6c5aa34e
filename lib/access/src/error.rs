//! Error types for the access crate.

use std::fmt;
use std::path::PathBuf;

/// Errors from loading access-control inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// A pattern failed to compile.
    InvalidPattern { pattern: String, reason: String },
    /// A credential or email file could not be read.
    FileUnreadable { path: PathBuf, reason: String },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "error compiling regex={pattern:?} {reason}")
            }
            Self::FileUnreadable { path, reason } => {
                write!(f, "could not read {}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for AccessError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pattern_display_quotes_pattern() {
        let err = AccessError::InvalidPattern {
            pattern: "(foo".to_string(),
            reason: "missing )".to_string(),
        };
        assert_eq!(err.to_string(), "error compiling regex=\"(foo\" missing )");
    }

    #[test]
    fn file_unreadable_display_names_path() {
        let err = AccessError::FileUnreadable {
            path: PathBuf::from("/etc/htpasswd"),
            reason: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/etc/htpasswd"));
    }
}
