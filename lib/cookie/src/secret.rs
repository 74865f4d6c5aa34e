//! Key material derivation for operator-supplied secrets.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_allow_trailing_bits(true)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent);

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// Key sizes accepted by the AES-GCM cipher.
pub const AES_KEY_SIZES: [usize; 3] = [16, 24, 32];

/// Derives key bytes from a configured secret.
///
/// A secret that is base64 (URL-safe or standard, padded or not) of exactly
/// 16, 24 or 32 bytes is decoded. Anything else is used verbatim.
#[must_use]
pub fn secret_bytes(secret: &str) -> Vec<u8> {
    for engine in [&URL_SAFE_LENIENT, &STANDARD_LENIENT] {
        if let Ok(decoded) = engine.decode(secret) {
            if AES_KEY_SIZES.contains(&decoded.len()) {
                return decoded;
            }
        }
    }
    secret.as_bytes().to_vec()
}
