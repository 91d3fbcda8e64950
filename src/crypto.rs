//! Hashing, addresses, and the backend signer key

use crate::error::{CredError, Result};
use ethers::signers::Signer;
use ethers::utils::to_checksum;
use rand::rngs::OsRng;
use serde::Serializer;
use sha2::{Digest, Sha256};

pub use ethers::signers::LocalWallet;
pub use ethers::types::Address;

/// Lowercase hex SHA-256, the form stored on-chain as `projectHash`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Lowercased, trimmed wallet string used as a storage key.
pub fn normalize_wallet(wallet: &str) -> String {
    wallet.trim().to_lowercase()
}

/// Parse a `0x`-prefixed or bare hex address. Checksum casing is not enforced.
pub fn parse_address(s: &str) -> Result<Address> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() != 40 {
        return Err(CredError::InvalidInput(format!(
            "Address must be 40 hex characters, got {}",
            digits.len()
        )));
    }
    let mut bytes = [0u8; 20];
    hex::decode_to_slice(digits, &mut bytes)
        .map_err(|e| CredError::InvalidInput(format!("Invalid hex address: {}", e)))?;
    Ok(Address::from(bytes))
}

/// EIP-55 mixed-case form.
pub fn checksum(address: &Address) -> String {
    to_checksum(address, None)
}

/// `0x` + lowercase hex, the storage-key form.
pub fn lower_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// Serialize an address in EIP-55 form, the way the node reports it.
pub fn serialize_checksum<S: Serializer>(
    address: &Address,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&checksum(address))
}

/// Fresh signer key from the OS random number generator.
pub fn generate_signer() -> LocalWallet {
    LocalWallet::new(&mut OsRng)
}

/// Accepts the key with or without a `0x` prefix.
pub fn signer_from_hex(secret: &str) -> Result<LocalWallet> {
    secret
        .trim()
        .parse::<LocalWallet>()
        .map_err(|e| CredError::CryptoError(format!("Invalid secret key: {}", e)))
}

pub fn secret_hex(wallet: &LocalWallet) -> String {
    hex::encode(wallet.signer().to_bytes())
}

/// Checksummed address of a signer key.
pub fn signer_address(wallet: &LocalWallet) -> String {
    checksum(&wallet.address())
}
