//! Time-stamped, HMAC-signed cookie values.
//!
//! A signed value has the shape `base64url(value)|unix_seconds|base64url(mac)`
//! where the MAC is HMAC-SHA256 over the cookie name, the encoded value and
//! the timestamp.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CookieError;

type HmacSha256 = Hmac<Sha256>;

/// How far ahead of the local clock a timestamp may be before it is refused.
const MAX_CLOCK_SKEW: Duration = Duration::minutes(5);

/// A value recovered from a cookie whose signature verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedValue {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

/// Signs and validates cookie values with a shared secret.
#[derive(Clone)]
pub struct CookieSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSigner").finish_non_exhaustive()
    }
}

impl CookieSigner {
    /// Creates a signer from key material.
    ///
    /// # Errors
    ///
    /// Returns `CookieError::MissingSecret` when the secret is empty.
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, CookieError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(CookieError::MissingSecret);
        }
        Ok(Self { secret })
    }

    fn mac(&self, parts: &[&str]) -> Result<HmacSha256, CookieError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| CookieError::MissingSecret)?;
        for part in parts {
            mac.update(part.as_bytes());
        }
        Ok(mac)
    }

    /// Produces the signed form of `value` for the cookie `name`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the key is rejected by the MAC.
    pub fn sign(&self, name: &str, value: &str, now: DateTime<Utc>) -> Result<String, CookieError> {
        let encoded = URL_SAFE.encode(value);
        let timestamp = now.timestamp().to_string();
        let signature = self.mac(&[name, &encoded, &timestamp])?.finalize().into_bytes();
        Ok(format!("{encoded}|{timestamp}|{}", URL_SAFE.encode(signature)))
    }

    /// Checks a signed value and returns its payload and issue time.
    ///
    /// `max_age` of `None` disables the age check. The signature comparison
    /// is constant-time.
    ///
    /// # Errors
    ///
    /// Returns a `CookieError` describing why the value cannot be trusted.
    pub fn validate(
        &self,
        name: &str,
        signed: &str,
        max_age: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<SignedValue, CookieError> {
        let parts: Vec<&str> = signed.split('|').collect();
        let [encoded, timestamp, signature] = parts.as_slice() else {
            return Err(CookieError::Malformed {
                reason: format!("expected 3 fields, got {}", parts.len()),
            });
        };

        let signature = URL_SAFE
            .decode(signature)
            .map_err(|_| CookieError::InvalidSignature)?;
        self.mac(&[name, encoded, timestamp])?
            .verify_slice(&signature)
            .map_err(|_| CookieError::InvalidSignature)?;

        let timestamp: i64 = timestamp.parse().map_err(|_| CookieError::Malformed {
            reason: format!("bad timestamp {timestamp:?}"),
        })?;
        let issued_at =
            DateTime::from_timestamp(timestamp, 0).ok_or_else(|| CookieError::Malformed {
                reason: format!("timestamp {timestamp} out of range"),
            })?;

        // A max age reaching past the representable range places no limit.
        if let Some(oldest) = max_age.and_then(|max_age| now.checked_sub_signed(max_age)) {
            if issued_at < oldest {
                return Err(CookieError::Expired {
                    age_secs: (now - issued_at).num_seconds(),
                });
            }
        }
        if issued_at > now + MAX_CLOCK_SKEW {
            return Err(CookieError::FromFuture { timestamp });
        }

        let raw = URL_SAFE
            .decode(encoded)
            .map_err(|e| CookieError::Malformed {
                reason: e.to_string(),
            })?;
        let value = String::from_utf8(raw).map_err(|e| CookieError::Malformed {
            reason: e.to_string(),
        })?;

        Ok(SignedValue { value, issued_at })
    }
}
