//! Capability-token generation.
//!
//! Expectation and trial ids gate their endpoints (`/observe/{id}`,
//! `/ack/{trial_id}`) with no further authentication, so they must be
//! unguessable: 128 bits from the OS RNG, URL-safe base64 without padding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Number of random bytes in a token (128 bits).
const TOKEN_BYTES: usize = 16;

/// Generate a fresh URL-safe capability token.
#[must_use]
pub fn url_safe_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
