//! AES-GCM encryption for tokens stored in session cookies.
//!
//! The key size selects AES-128, AES-192 or AES-256. Ciphertexts are
//! `base64(nonce || sealed)` with a fresh random 96-bit nonce per call.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::CipherError;

type Aes192Gcm = AesGcm<aes_gcm::aes::Aes192, U12>;

#[derive(Clone)]
enum Key {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

/// Symmetric cipher for cookie tokens.
#[derive(Clone)]
pub struct Cipher {
    key: Key,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bits = match self.key {
            Key::Aes128(_) => 128,
            Key::Aes192(_) => 192,
            Key::Aes256(_) => 256,
        };
        f.debug_struct("Cipher").field("bits", &bits).finish()
    }
}

impl Cipher {
    /// Creates a cipher from 16, 24 or 32 bytes of key material.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::InvalidKeyLength` for any other key size.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        let invalid = |_| CipherError::InvalidKeyLength { len: key.len() };
        let key = match key.len() {
            16 => Key::Aes128(Aes128Gcm::new_from_slice(key).map_err(invalid)?),
            24 => Key::Aes192(Aes192Gcm::new_from_slice(key).map_err(invalid)?),
            32 => Key::Aes256(Aes256Gcm::new_from_slice(key).map_err(invalid)?),
            len => return Err(CipherError::InvalidKeyLength { len }),
        };
        Ok(Self { key })
    }

    /// Encrypts `plaintext` and returns it base64-encoded.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::Encrypt` if sealing fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let sealed = match &self.key {
            Key::Aes128(cipher) => seal(cipher, plaintext.as_bytes())?,
            Key::Aes192(cipher) => seal(cipher, plaintext.as_bytes())?,
            Key::Aes256(cipher) => seal(cipher, plaintext.as_bytes())?,
        };
        Ok(STANDARD.encode(sealed))
    }

    /// Decrypts a value produced by [`Cipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns `CipherError::Decrypt` when the value is not valid base64,
    /// was sealed with another key, or was altered.
    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let data = STANDARD.decode(encoded).map_err(|e| CipherError::Decrypt {
            reason: e.to_string(),
        })?;
        let opened = match &self.key {
            Key::Aes128(cipher) => open(cipher, &data)?,
            Key::Aes192(cipher) => open(cipher, &data)?,
            Key::Aes256(cipher) => open(cipher, &data)?,
        };
        String::from_utf8(opened).map_err(|e| CipherError::Decrypt {
            reason: e.to_string(),
        })
    }
}

fn seal<C: Aead + AeadCore>(cipher: &C, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let nonce = C::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CipherError::Encrypt)?;
    let mut out = nonce.to_vec();
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn open<C: Aead + AeadCore>(cipher: &C, data: &[u8]) -> Result<Vec<u8>, CipherError> {
    let nonce_len = C::NonceSize::USIZE;
    if data.len() < nonce_len {
        return Err(CipherError::Decrypt {
            reason: "ciphertext shorter than nonce".to_string(),
        });
    }
    let (nonce, sealed) = data.split_at(nonce_len);
    cipher
        .decrypt(GenericArray::from_slice(nonce), sealed)
        .map_err(|_| CipherError::Decrypt {
            reason: "authentication failed".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypts_and_decrypts_with_every_key_size() {
        for key in [
            b"16 bytes AES-128".as_slice(),
            b"24 byte secret AES-192--".as_slice(),
            b"32 byte secret for AES-256------".as_slice(),
        ] {
            let cipher = Cipher::new(key).expect("cipher");
            let encrypted = cipher.encrypt("my access token").expect("encrypt");
            assert_ne!(encrypted, "my access token");
            assert_eq!(cipher.decrypt(&encrypted).expect("decrypt"), "my access token");
        }
    }

    #[test]
    fn rejects_other_key_sizes() {
        assert_eq!(
            Cipher::new(b"too short").unwrap_err(),
            CipherError::InvalidKeyLength { len: 9 }
        );
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let cipher = Cipher::new(b"16 bytes AES-128").expect("cipher");
        let first = cipher.encrypt("token").expect("encrypt");
        let second = cipher.encrypt("token").expect("encrypt");
        assert_ne!(first, second);
    }

    #[test]
    fn value_from_another_key_does_not_decrypt() {
        let cipher = Cipher::new(b"16 bytes AES-128").expect("cipher");
        let other = Cipher::new(b"another 16 bytes").expect("cipher");
        let encrypted = cipher.encrypt("token").expect("encrypt");
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let cipher = Cipher::new(b"16 bytes AES-128").expect("cipher");
        assert!(cipher.decrypt(&STANDARD.encode(b"abc")).is_err());
    }
}
