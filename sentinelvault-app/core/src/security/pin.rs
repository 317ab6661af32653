//! Vault PIN format rules and salted Argon2id hashing.
//!
//! The PIN itself is never persisted. Setting a PIN stores a per-principal
//! random salt, the Argon2id parameters and the derived hash; unlocking
//! re-derives with the stored parameters and compares in constant time.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Result, SentinelError};
use crate::storage::PinKdfSettings;
use crate::vault::UnlockError;

/// Number of digits in a vault PIN.
pub const PIN_LENGTH: usize = 4;

/// Salt size in bytes (128 bits)
const SALT_SIZE: usize = 16;

/// Derived hash size in bytes
const HASH_SIZE: usize = 32;

/// Stored form of a hashed PIN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinHash {
    /// Hex-encoded 16-byte salt
    pub salt: String,
    /// Hex-encoded 32-byte Argon2id output
    pub hash: String,
    pub memory_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

/// Check that a candidate is exactly four ASCII digits.
pub fn validate_pin_format(pin: &str) -> std::result::Result<(), UnlockError> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(UnlockError::MalformedPin)
    }
}

fn derive(
    pin: &str,
    salt: &[u8],
    memory_kib: u32,
    time_cost: u32,
    parallelism: u32,
) -> Result<Zeroizing<[u8; HASH_SIZE]>> {
    let params = Params::new(memory_kib, time_cost, parallelism, Some(HASH_SIZE))
        .map_err(|e| SentinelError::Validation(format!("Invalid Argon2 params: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = Zeroizing::new([0u8; HASH_SIZE]);
    argon2
        .hash_password_into(pin.as_bytes(), salt, &mut out[..])
        .map_err(|e| SentinelError::Store(format!("PIN derivation failed: {}", e)))?;
    Ok(out)
}

/// Hash a well-formed PIN with a fresh random salt.
pub fn hash_pin(pin: &str, kdf: &PinKdfSettings) -> Result<PinHash> {
    validate_pin_format(pin)?;

    let mut salt = [0u8; SALT_SIZE];
    rand::rng().fill_bytes(&mut salt);

    let hash = derive(pin, &salt, kdf.memory_kib, kdf.time_cost, kdf.parallelism)?;
    debug!("Derived {}-byte PIN hash", hash.len());

    Ok(PinHash {
        salt: hex::encode(salt),
        hash: hex::encode(&hash[..]),
        memory_kib: kdf.memory_kib,
        time_cost: kdf.time_cost,
        parallelism: kdf.parallelism,
    })
}

/// Re-derive `candidate` with the stored salt and parameters and compare.
pub fn verify_pin(candidate: &str, stored: &PinHash) -> Result<bool> {
    let salt = hex::decode(&stored.salt)
        .map_err(|e| SentinelError::Store(format!("Corrupted PIN salt: {}", e)))?;
    let expected = Zeroizing::new(
        hex::decode(&stored.hash)
            .map_err(|e| SentinelError::Store(format!("Corrupted PIN hash: {}", e)))?,
    );

    let derived = derive(
        candidate,
        &salt,
        stored.memory_kib,
        stored.time_cost,
        stored.parallelism,
    )?;

    Ok(derived[..].ct_eq(&expected[..]).into())
}

/// Compare against a PIN stored in plaintext by older profiles.
pub fn verify_legacy_pin(candidate: &str, stored: &str) -> bool {
    candidate.as_bytes().ct_eq(stored.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_kdf() -> PinKdfSettings {
        PinKdfSettings {
            memory_kib: 256,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_pin_format() {
        assert!(validate_pin_format("1234").is_ok());
        assert!(validate_pin_format("0000").is_ok());
        assert!(matches!(validate_pin_format("123"), Err(UnlockError::MalformedPin)));
        assert!(matches!(validate_pin_format("12345"), Err(UnlockError::MalformedPin)));
        assert!(matches!(validate_pin_format("12a4"), Err(UnlockError::MalformedPin)));
        assert!(matches!(validate_pin_format("١٢٣٤"), Err(UnlockError::MalformedPin)));
        assert!(matches!(validate_pin_format(""), Err(UnlockError::MalformedPin)));
    }

    #[test]
    fn test_hash_and_verify() {
        let stored = hash_pin("1234", &fast_kdf()).unwrap();
        assert!(verify_pin("1234", &stored).unwrap());
        assert!(!verify_pin("4321", &stored).unwrap());
    }

    #[test]
    fn test_salts_differ_per_hash() {
        let a = hash_pin("1234", &fast_kdf()).unwrap();
        let b = hash_pin("1234", &fast_kdf()).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash, "Same PIN with different salts must differ");
    }

    #[test]
    fn test_hash_rejects_malformed_pin() {
        assert!(matches!(
            hash_pin("12", &fast_kdf()),
            Err(SentinelError::Validation(_))
        ));
    }

    #[test]
    fn test_corrupted_hash_is_store_error() {
        let mut stored = hash_pin("1234", &fast_kdf()).unwrap();
        stored.salt = "not-hex".into();
        assert!(matches!(
            verify_pin("1234", &stored),
            Err(SentinelError::Store(_))
        ));
    }

    #[test]
    fn test_legacy_compare() {
        assert!(verify_legacy_pin("1234", "1234"));
        assert!(!verify_legacy_pin("1234", "1235"));
        assert!(!verify_legacy_pin("1234", ""));
    }
}
