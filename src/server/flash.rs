//! One-shot flash messages carried in a signed cookie.
//!
//! Cookie value: `{hex blake3 keyed hash}.{url-encoded message}`. The key is
//! derived from the service's secret key, so a cookie minted by another
//! instance (or edited by the client) fails verification and is ignored.

use axum::http::header::COOKIE;
use axum::http::HeaderMap;

pub const FLASH_COOKIE: &str = "flash";

/// `Set-Cookie` value that deletes the flash cookie.
pub const CLEAR_FLASH_COOKIE: &str = "flash=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax";

const KEY_CONTEXT: &str = "region-extract 2024-05 flash cookie signing key";

/// Signing key for flash cookies.
#[derive(Clone)]
pub struct FlashKey([u8; 32]);

impl std::fmt::Debug for FlashKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FlashKey(<redacted>)")
    }
}

impl FlashKey {
    pub fn derive(secret: &str) -> Self {
        Self(blake3::derive_key(KEY_CONTEXT, secret.as_bytes()))
    }

    fn sign(&self, payload: &str) -> blake3::Hash {
        blake3::keyed_hash(&self.0, payload.as_bytes())
    }

    pub fn encode(&self, message: &str) -> String {
        let payload = urlencoding::encode(message);
        format!("{}.{}", self.sign(&payload).to_hex(), payload)
    }

    /// Verify and decode a cookie value. `None` for anything tampered.
    pub fn decode(&self, value: &str) -> Option<String> {
        let (mac, payload) = value.split_once('.')?;
        let mac = blake3::Hash::from_hex(mac).ok()?;
        // blake3::Hash equality is constant-time
        if mac != self.sign(payload) {
            return None;
        }
        urlencoding::decode(payload).ok().map(|s| s.into_owned())
    }

    /// Full `Set-Cookie` header value carrying `message`.
    pub fn set_cookie(&self, message: &str) -> String {
        format!(
            "{FLASH_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
            self.encode(message)
        )
    }
}

/// Raw value of the flash cookie in the request, if any.
pub fn read_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            pair.trim()
                .strip_prefix(FLASH_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
}
