//! Session payload encoding.
//!
//! Without a cipher (or without an access token) the payload is just the
//! account info, `email:<e> user:<u>`. With a cipher the tokens ride along
//! encrypted: `email:<e> user:<u>|enc(access)|expires_unix|enc(refresh)`.

use authgate_core::SessionState;
use chrono::DateTime;

use crate::cipher::Cipher;
use crate::error::CookieError;

/// Serializes a session into a cookie payload.
///
/// # Errors
///
/// Returns `CookieError::Cipher` if a token fails to encrypt.
pub fn encode_session(session: &SessionState, cipher: Option<&Cipher>) -> Result<String, CookieError> {
    let Some(cipher) = cipher else {
        return Ok(session.account_info());
    };
    let Some(access_token) = session.access_token() else {
        return Ok(session.account_info());
    };

    let access = cipher.encrypt(access_token)?;
    let refresh = match session.refresh_token() {
        Some(token) => cipher.encrypt(token)?,
        None => String::new(),
    };
    let expires = session.expires_on().map_or(0, |t| t.timestamp());
    Ok(format!(
        "{}|{access}|{expires}|{refresh}",
        session.account_info()
    ))
}

/// Parses a cookie payload back into a session.
///
/// Tokens are only recovered when a cipher is supplied.
///
/// # Errors
///
/// Returns `CookieError::InvalidPayload` for payloads of the wrong shape and
/// `CookieError::Cipher` when an encrypted token does not decrypt.
pub fn decode_session(value: &str, cipher: Option<&Cipher>) -> Result<SessionState, CookieError> {
    let chunks: Vec<&str> = value.split('|').collect();
    match chunks.as_slice() {
        [single] if single.contains(':') => decode_account_info(single),
        [email] => {
            let user = email.split('@').next().unwrap_or_default();
            Ok(SessionState::for_user(user).with_email(*email))
        }
        [account, access, expires, refresh] => {
            let mut session = decode_account_info(account)?;
            if let Some(cipher) = cipher {
                if !access.is_empty() {
                    session = session.with_access_token(cipher.decrypt(access)?);
                }
                if !refresh.is_empty() {
                    session = session.with_refresh_token(cipher.decrypt(refresh)?);
                }
            }
            let expires_on = expires
                .parse::<i64>()
                .ok()
                .filter(|ts| *ts > 0)
                .and_then(|ts| DateTime::from_timestamp(ts, 0));
            Ok(session.with_expires_on(expires_on))
        }
        other => Err(CookieError::InvalidPayload {
            reason: format!("invalid number of fields (got {} expected 4)", other.len()),
        }),
    }
}

fn decode_account_info(value: &str) -> Result<SessionState, CookieError> {
    let chunks: Vec<&str> = value.split(' ').collect();
    let [email, user] = chunks.as_slice() else {
        return Err(CookieError::InvalidPayload {
            reason: format!("expected 2 chunks got {}", chunks.len()),
        });
    };
    let email = email.strip_prefix("email:").unwrap_or(email);
    let mut user = user.strip_prefix("user:").unwrap_or(user);
    if user.is_empty() {
        user = email.split('@').next().unwrap_or_default();
    }
    Ok(SessionState::for_user(user).with_email(email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cipher() -> Cipher {
        Cipher::new(b"0123456789abcdefghijklmnopqrstuv").expect("cipher")
    }

    fn full_session() -> SessionState {
        let expires = DateTime::from_timestamp(Utc::now().timestamp() + 3600, 0);
        SessionState::for_user("user")
            .with_email("user@domain.com")
            .with_access_token("token1234")
            .with_refresh_token("refresh4321")
            .with_expires_on(expires)
    }

    #[test]
    fn encodes_with_cipher_and_restores_every_field() {
        let session = full_session();
        let encoded = encode_session(&session, Some(&cipher())).expect("encode");
        assert!(!encoded.contains("token1234"));
        assert!(!encoded.contains("refresh4321"));

        let decoded = decode_session(&encoded, Some(&cipher())).expect("decode");
        assert_eq!(decoded, session);
    }

    #[test]
    fn encodes_without_cipher_as_account_info_only() {
        let encoded = encode_session(&full_session(), None).expect("encode");
        assert_eq!(encoded, "email:user@domain.com user:user");

        let decoded = decode_session(&encoded, None).expect("decode");
        assert_eq!(decoded.email(), Some("user@domain.com"));
        assert_eq!(decoded.user(), Some("user"));
        assert_eq!(decoded.access_token(), None);
        assert_eq!(decoded.expires_on(), None);
    }

    #[test]
    fn session_without_token_skips_encryption() {
        let session = SessionState::for_user("alice");
        let encoded = encode_session(&session, Some(&cipher())).expect("encode");
        assert_eq!(encoded, "email: user:alice");
        assert_eq!(decode_session(&encoded, Some(&cipher())).expect("decode"), session);
    }

    #[test]
    fn encrypted_payload_without_cipher_keeps_account_only() {
        let encoded = encode_session(&full_session(), Some(&cipher())).expect("encode");
        let decoded = decode_session(&encoded, None).expect("decode");
        assert_eq!(decoded.email(), Some("user@domain.com"));
        assert_eq!(decoded.access_token(), None);
        assert_eq!(decoded.refresh_token(), None);
    }

    #[test]
    fn missing_user_falls_back_to_email_local_part() {
        let decoded = decode_session("email:michael.bland@gsa.gov user:", None).expect("decode");
        assert_eq!(decoded.user(), Some("michael.bland"));
    }

    #[test]
    fn legacy_email_only_payload_decodes() {
        let decoded = decode_session("bob@example.com", None).expect("decode");
        assert_eq!(decoded.email(), Some("bob@example.com"));
        assert_eq!(decoded.user(), Some("bob"));
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(matches!(
            decode_session("a|b", None),
            Err(CookieError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn tokens_from_another_key_fail_to_decode() {
        let encoded = encode_session(&full_session(), Some(&cipher())).expect("encode");
        let other = Cipher::new(b"ffffffffffffffffffffffffffffffff").expect("cipher");
        assert!(matches!(
            decode_session(&encoded, Some(&other)),
            Err(CookieError::Cipher(_))
        ));
    }
}
