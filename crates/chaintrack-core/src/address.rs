//! Solana account address validation.
//!
//! A well-formed address is 32–44 base58 characters that decode to exactly
//! 32 bytes (an ed25519 public key).

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Ways an address string can fail validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The string is outside the base58 alphabet or the 32–44 char window.
    #[error("invalid address format")]
    MalformedFormat,

    /// The string is base58 but decodes to the wrong number of bytes.
    #[error("invalid address length")]
    InvalidLength,

    /// Base58 decoding itself failed.
    #[error("failed to decode address: {0}")]
    DecodeFailure(String),
}

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("address pattern is valid")
    })
}

/// Validate a Solana account address.
///
/// Checks the base58 alphabet/length pattern first, then decodes and
/// verifies the 32-byte public key length. Pure; callable from any task.
pub fn validate_address(address: &str) -> Result<(), AddressError> {
    if !address_pattern().is_match(address) {
        return Err(AddressError::MalformedFormat);
    }

    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|e| AddressError::DecodeFailure(e.to_string()))?;

    if decoded.len() != 32 {
        return Err(AddressError::InvalidLength);
    }

    Ok(())
}
