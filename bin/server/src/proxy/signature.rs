//! HMAC signing of proxied requests.
//!
//! Upstreams verify `GAP-Signature` to trust the identity headers the proxy
//! injected. The signed message is the method, a fixed list of headers (each
//! as comma-joined values plus a newline), the decoded path with its raw query,
//! and the body when the request declares a `Content-Length`.

use std::fmt;
use std::str::FromStr;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::auth::request::decoded_path;

pub const SIGNATURE_HEADER: &str = "GAP-Signature";
pub const AUTH_HEADER: &str = "GAP-Auth";

/// Headers covered by the signature, in order.
pub const SIGNED_HEADERS: [&str; 10] = [
    "Content-Length",
    "Content-Md5",
    "Content-Type",
    "Date",
    "Authorization",
    "X-Forwarded-User",
    "X-Forwarded-Email",
    "X-Forwarded-Access-Token",
    "Cookie",
    "Gap-Auth",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

/// Errors parsing an `algorithm:secret` signature key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    Malformed { value: String },
    UnsupportedAlgorithm { value: String },
    InvalidKey,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { value } => {
                write!(f, "invalid signature key, expected hash:secret: {value}")
            }
            Self::UnsupportedAlgorithm { value } => {
                write!(f, "unsupported signature hash algorithm: {value}")
            }
            Self::InvalidKey => write!(f, "signature key rejected by HMAC"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// A parsed `algorithm:secret` pair.
#[derive(Clone, PartialEq, Eq)]
pub struct SignatureKey {
    algorithm: SignatureAlgorithm,
    key: Vec<u8>,
}

impl fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl FromStr for SignatureKey {
    type Err = SignatureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (algorithm, key) = value.split_once(':').ok_or_else(|| SignatureError::Malformed {
            value: value.to_string(),
        })?;
        let algorithm = match algorithm {
            "sha1" => SignatureAlgorithm::Sha1,
            "sha224" => SignatureAlgorithm::Sha224,
            "sha256" => SignatureAlgorithm::Sha256,
            "sha384" => SignatureAlgorithm::Sha384,
            "sha512" => SignatureAlgorithm::Sha512,
            _ => {
                return Err(SignatureError::UnsupportedAlgorithm {
                    value: value.to_string(),
                });
            }
        };
        Ok(Self {
            algorithm,
            key: key.as_bytes().to_vec(),
        })
    }
}

impl SignatureKey {
    #[must_use]
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Computes the `GAP-Signature` value for a request.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::InvalidKey` if the HMAC rejects the key.
    pub fn signature(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<String, SignatureError> {
        let message = string_to_sign(method, uri, headers);
        let body = body.filter(|_| headers.contains_key(header::CONTENT_LENGTH));
        let digest = match self.algorithm {
            SignatureAlgorithm::Sha1 => compute::<Hmac<Sha1>>(&self.key, &message, body)?,
            SignatureAlgorithm::Sha224 => compute::<Hmac<Sha224>>(&self.key, &message, body)?,
            SignatureAlgorithm::Sha256 => compute::<Hmac<Sha256>>(&self.key, &message, body)?,
            SignatureAlgorithm::Sha384 => compute::<Hmac<Sha384>>(&self.key, &message, body)?,
            SignatureAlgorithm::Sha512 => compute::<Hmac<Sha512>>(&self.key, &message, body)?,
        };
        Ok(format!("{} {}", self.algorithm.as_str(), STANDARD.encode(digest)))
    }

    /// Adds `GAP-Signature` to `headers`.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::InvalidKey` if the HMAC rejects the key.
    pub fn sign(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &mut HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<(), SignatureError> {
        let signature = self.signature(method, uri, headers, body)?;
        let value = HeaderValue::from_str(&signature).map_err(|_| SignatureError::InvalidKey)?;
        headers.insert(HeaderName::from_static("gap-signature"), value);
        Ok(())
    }
}

fn compute<M: Mac + KeyInit>(
    key: &[u8],
    message: &str,
    body: Option<&[u8]>,
) -> Result<Vec<u8>, SignatureError> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(message.as_bytes());
    if let Some(body) = body {
        mac.update(body);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// The canonical message covered by the signature.
#[must_use]
pub fn string_to_sign(method: &Method, uri: &Uri, headers: &HeaderMap) -> String {
    let mut message = format!("{method}\n");
    for name in SIGNED_HEADERS {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        message.push_str(&values.join(","));
        message.push('\n');
    }
    message.push_str(&decoded_path(uri));
    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        message.push('?');
        message.push_str(query);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("11"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.append("X-Forwarded-User", HeaderValue::from_static("mbland"));
        headers.append(header::COOKIE, HeaderValue::from_static("foo=bar"));
        headers.append(header::COOKIE, HeaderValue::from_static("baz=quux"));
        headers.insert("GAP-Auth", HeaderValue::from_static("mbland@acm.org"));
        headers
    }

    #[test]
    fn canonical_message_lists_headers_in_order() {
        let uri: Uri = "/foo/bar?baz=quux".parse().expect("uri");
        let message = string_to_sign(&Method::POST, &uri, &request_headers());
        assert_eq!(
            message,
            "POST\n11\n\ntext/plain\n\n\nmbland\n\n\nfoo=bar,baz=quux\nmbland@acm.org\n/foo/bar?baz=quux"
        );
    }

    #[test]
    fn canonical_message_uses_decoded_path_and_raw_query() {
        let uri: Uri = "/a%2Fb%20c?next=%2Fhome".parse().expect("uri");
        let message = string_to_sign(&Method::GET, &uri, &HeaderMap::new());
        assert!(message.ends_with("\n/a/b c?next=%2Fhome"));
    }

    #[test]
    fn parses_every_supported_algorithm() {
        for name in ["sha1", "sha224", "sha256", "sha384", "sha512"] {
            let key: SignatureKey = format!("{name}:secret").parse().expect("key");
            assert_eq!(key.algorithm().as_str(), name);
        }
    }

    #[test]
    fn signature_changes_with_body_and_headers() {
        let key: SignatureKey = "sha256:secret".parse().expect("key");
        let uri: Uri = "/foo/bar".parse().expect("uri");
        let headers = request_headers();

        let signed = key
            .signature(&Method::POST, &uri, &headers, Some(b"hello world"))
            .expect("signature");
        assert!(signed.starts_with("sha256 "));
        let other_body = key
            .signature(&Method::POST, &uri, &headers, Some(b"hello there"))
            .expect("signature");
        assert_ne!(signed, other_body);

        let mut forged = headers.clone();
        forged.insert("X-Forwarded-User", HeaderValue::from_static("eve"));
        let other_user = key
            .signature(&Method::POST, &uri, &forged, Some(b"hello world"))
            .expect("signature");
        assert_ne!(signed, other_user);
    }

    #[test]
    fn body_is_ignored_without_content_length() {
        let key: SignatureKey = "sha1:secret".parse().expect("key");
        let uri: Uri = "/".parse().expect("uri");
        let headers = HeaderMap::new();
        assert_eq!(
            key.signature(&Method::GET, &uri, &headers, Some(b"ignored"))
                .expect("signature"),
            key.signature(&Method::GET, &uri, &headers, None).expect("signature")
        );
    }

    #[test]
    fn sign_sets_header() {
        let key: SignatureKey = "sha512:secret".parse().expect("key");
        let uri: Uri = "/".parse().expect("uri");
        let mut headers = HeaderMap::new();
        key.sign(&Method::GET, &uri, &mut headers, None).expect("sign");
        let value = headers.get(SIGNATURE_HEADER).expect("header");
        assert!(value.to_str().expect("ascii").starts_with("sha512 "));
    }
}
