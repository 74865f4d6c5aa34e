//! Error types for identity provider operations.

use std::fmt;

/// Errors from talking to an identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider was configured with an unusable setting.
    Configuration { reason: String },
    /// No provider is registered under this name.
    UnknownProvider { name: String },
    /// The callback carried no authorization code.
    MissingCode,
    /// A request could not be sent or its body could not be read.
    Request { url: String, reason: String },
    /// The provider answered with a non-success status.
    Status { url: String, status: u16, body: String },
    /// The provider's response could not be decoded.
    Decode { url: String, reason: String },
    /// Exchanging a code or refresh token failed.
    Redemption { reason: String },
    /// The identity token failed verification.
    TokenVerification { reason: String },
    /// The identity token asserts an email the provider has not verified.
    UnverifiedEmail { email: String },
    /// A required field was absent from the provider's response.
    MissingField { field: String },
    /// A session operation needed an access token and none was present.
    MissingAccessToken,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { reason } => write!(f, "provider configuration error: {reason}"),
            Self::UnknownProvider { name } => write!(f, "unknown provider: {name}"),
            Self::MissingCode => write!(f, "missing code"),
            Self::Request { url, reason } => write!(f, "request to {url} failed: {reason}"),
            Self::Status { url, status, body } => {
                write!(f, "got {status} from {url:?} {body}")
            }
            Self::Decode { url, reason } => {
                write!(f, "could not decode response from {url}: {reason}")
            }
            Self::Redemption { reason } => write!(f, "code redemption failed: {reason}"),
            Self::TokenVerification { reason } => {
                write!(f, "could not verify id_token: {reason}")
            }
            Self::UnverifiedEmail { email } => {
                write!(f, "email in id_token ({email}) isn't verified")
            }
            Self::MissingField { field } => write!(f, "response did not contain {field}"),
            Self::MissingAccessToken => write!(f, "missing access token"),
        }
    }
}

impl std::error::Error for ProviderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_includes_url_and_body() {
        let err = ProviderError::Status {
            url: "https://idp.example.com/token".to_string(),
            status: 400,
            body: "bad_verification_code".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("400"));
        assert!(rendered.contains("idp.example.com"));
        assert!(rendered.contains("bad_verification_code"));
    }

    #[test]
    fn unverified_email_display_names_email() {
        let err = ProviderError::UnverifiedEmail {
            email: "eve@example.com".to_string(),
        };
        assert_eq!(err.to_string(), "email in id_token (eve@example.com) isn't verified");
    }
}
