//! Name-bound authenticated cookie codec.
//!
//! The value is `base64url(plaintext) + "." + hex(mac)` where the MAC is
//! HMAC-SHA256 over `name|payload`. Binding the cookie name into the MAC
//! means a value minted for one sandbox never decodes under another's
//! cookie name.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Encodes and decodes sandbox session cookie values.
#[derive(Clone)]
pub struct CookieCodec {
    secret: Vec<u8>,
}

impl CookieCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Produce the opaque cookie value for `plaintext` under `name`.
    pub fn encode(&self, name: &str, plaintext: &str) -> String {
        let payload = URL_SAFE_NO_PAD.encode(plaintext);
        let tag = hex::encode(self.mac(name, &payload));
        format!("{payload}.{tag}")
    }

    /// Recover the plaintext, verifying integrity and name binding.
    pub fn decode(&self, name: &str, opaque: &str) -> Result<String, CryptoError> {
        let (payload, tag) = opaque.split_once('.').ok_or(CryptoError::Malformed)?;
        let presented = hex::decode(tag).map_err(|_| CryptoError::Malformed)?;

        let expected = self.mac(name, payload);
        if !bool::from(expected.ct_eq(&presented)) {
            return Err(CryptoError::BadSignature);
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| CryptoError::Payload)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::Payload)
    }

    fn mac(&self, name: &str, payload: &str) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC key can be any length");
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}
