//! Secure random secret generation for device keys and IVs.

use crate::crypto::{CryptoError, Result};
use rand::rngs::OsRng;
use rand::RngCore;

/// Printable alphabet secrets are drawn from (88 symbols).
pub const SECRET_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()-_=+[]{}|;:,.<>?";

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above it are rejected so every symbol is equally likely.
const ACCEPT_BELOW: u16 = (256 / SECRET_ALPHABET.len() as u16) * SECRET_ALPHABET.len() as u16;

/// Generate a random printable secret of exactly `length` bytes.
///
/// Randomness comes from the operating system. Each output byte is ASCII,
/// so the string length in bytes equals `length`.
///
/// # Errors
/// - `InvalidLength` if `length` is zero
/// - `Entropy` if the OS random source fails
pub fn generate_secret(length: usize) -> Result<String> {
    if length == 0 {
        return Err(CryptoError::InvalidLength(
            "secret length must be positive".to_string(),
        ));
    }

    let mut out = String::with_capacity(length);
    let mut buf = [0u8; 64];

    while out.len() < length {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| CryptoError::Entropy(e.to_string()))?;

        for &byte in buf.iter() {
            if u16::from(byte) >= ACCEPT_BELOW {
                continue;
            }
            let idx = usize::from(byte) % SECRET_ALPHABET.len();
            out.push(char::from(SECRET_ALPHABET[idx]));
            if out.len() == length {
                break;
            }
        }
    }

    Ok(out)
}
