//! Share-code generation.
//!
//! A share code is the short public name of one pending transfer. Codes are
//! drawn from the OS entropy source and encoded with a URL-safe alphabet so
//! they survive being pasted into links and chat messages unescaped.
//!
//! Generation never consults the session table. Uniqueness is enforced by
//! the store's insert contract: a colliding code is rejected there and the
//! publisher draws again. The entropy below makes that retry path all but
//! unreachable in practice.

use rand::RngCore;
use rand::rngs::OsRng;

/// URL-safe, case-sensitive alphabet. 64 symbols, so each character carries
/// six bits.
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Fixed code length. Ten characters over a 64-symbol alphabet is 60 bits of
/// entropy.
pub const CODE_LEN: usize = 10;

/// Draws a fresh share code from the OS entropy source.
pub fn generate() -> String {
    let mut bytes = [0u8; CODE_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| ALPHABET[(b & 0x3f) as usize] as char)
        .collect()
}
