//! Session token generation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Generates a new opaque session token.
///
/// The token is 32 bytes (256 bits) of random data encoded as base64url
/// without padding (43 characters), comfortably above the 122-bit floor
/// required for session identifiers.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
