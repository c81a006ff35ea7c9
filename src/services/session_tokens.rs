use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// 32 random bytes -> 43 URL-safe characters, ≥ 256 bits of entropy.
const TOKEN_BYTES: usize = 32;

pub(crate) fn mint() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
