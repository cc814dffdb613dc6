//! Cryptographic primitives for the relay.
//!
//! This module provides:
//! - Secret/IV generation over a printable alphabet
//! - AES-CBC encryption with PKCS#7 padding, base64 encoded
//!
//! There is no authentication tag: the upstream push service expects plain
//! CBC ciphertext, so integrity is not provided at this layer.

pub mod cipher;
pub mod secret;

pub use cipher::{decrypt_from_base64, encrypt_to_base64, is_valid_key_length, BLOCK_SIZE};
pub use secret::{generate_secret, SECRET_ALPHABET};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key length: expected 16, 24 or 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid IV length: expected {expected}, got {got}")]
    InvalidIvLength { expected: usize, got: usize },

    #[error("Invalid length: {0}")]
    InvalidLength(String),

    #[error("Random number generation failed: {0}")]
    Entropy(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
