//! AES-CBC encryption and decryption for notification payloads.
//!
//! Uses AES in CBC mode with:
//! - 128, 192 or 256-bit key, chosen by key length
//! - 128-bit (16 byte) IV supplied by the device record
//! - PKCS#7 padding to the block size
//!
//! Output is standard base64 of the raw ciphertext. Identical inputs
//! always produce identical ciphertext.

use crate::crypto::{CryptoError, Result};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use base64::Engine;
use zeroize::Zeroizing;

/// AES block size in bytes; also the only accepted IV length.
pub const BLOCK_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes192CbcEnc = cbc::Encryptor<Aes192>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes192CbcDec = cbc::Decryptor<Aes192>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Whether `len` selects one of the supported AES variants.
pub fn is_valid_key_length(len: usize) -> bool {
    matches!(len, 16 | 24 | 32)
}

fn check_lengths(key: &[u8], iv: &[u8]) -> Result<()> {
    if !is_valid_key_length(key.len()) {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    if iv.len() != BLOCK_SIZE {
        return Err(CryptoError::InvalidIvLength {
            expected: BLOCK_SIZE,
            got: iv.len(),
        });
    }
    Ok(())
}

fn invalid_length(e: impl std::fmt::Display) -> CryptoError {
    CryptoError::InvalidLength(e.to_string())
}

/// Encrypt `plaintext` and return base64 ciphertext.
///
/// # Errors
/// - `InvalidKeyLength` unless the key is 16, 24 or 32 bytes
/// - `InvalidIvLength` unless the IV is exactly [`BLOCK_SIZE`] bytes
pub fn encrypt_to_base64(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<String> {
    check_lengths(key, iv)?;

    let ciphertext = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => Aes192CbcEnc::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };

    Ok(base64::engine::general_purpose::STANDARD.encode(ciphertext))
}

/// Decrypt base64 ciphertext produced by [`encrypt_to_base64`].
///
/// Padding errors surface as `DecryptionFailed`; a wrong key is only
/// detected when it happens to break the padding.
pub fn decrypt_from_base64(encoded: &str, key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    check_lengths(key, iv)?;

    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid base64: {}", e)))?;

    let plaintext = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
        24 => Aes192CbcDec::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
        _ => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
    }
    .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    Ok(plaintext)
}

/// Encrypt a string payload with string-typed key material.
///
/// Device secrets are stored as printable strings; their UTF-8 bytes are
/// the key. The byte copy is wiped once the call returns.
pub fn encrypt_string(plaintext: &str, key: &str, iv: &str) -> Result<String> {
    let key_bytes = Zeroizing::new(key.as_bytes().to_vec());
    encrypt_to_base64(plaintext.as_bytes(), &key_bytes, iv.as_bytes())
}
