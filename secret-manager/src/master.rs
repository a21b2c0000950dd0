//! Master-key derivation from a configured master password (spec.md §4.J):
//! PBKDF2-HMAC-SHA256 with at least 100k iterations, matching the
//! password-based key derivation idiom used across the enrichment pack
//! (`paritytech-polkadot-sdk`).

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

/// Lower bound on KDF iterations, per spec.md §4.J ("≥100k iterations").
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// A 256-bit key derived from the operator's master password. Lives in
/// process memory only; never persisted (spec.md §5 "Shared-resource
/// policy").
#[derive(Clone)]
pub struct MasterKey(pub(crate) [u8; 32]);

impl MasterKey {
    /// Derives the key via PBKDF2-HMAC-SHA256. `iterations` is clamped up
    /// to [`MIN_PBKDF2_ITERATIONS`] if a caller passes something lower.
    pub fn derive(master_password: &str, salt: &[u8], iterations: u32) -> Self {
        let rounds = iterations.max(MIN_PBKDF2_ITERATIONS);
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(master_password.as_bytes(), salt, rounds, &mut key);
        Self(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_and_salt_derive_the_same_key() {
        let a = MasterKey::derive("correct horse battery staple", b"salt1", MIN_PBKDF2_ITERATIONS);
        let b = MasterKey::derive("correct horse battery staple", b"salt1", MIN_PBKDF2_ITERATIONS);
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn different_salts_derive_different_keys() {
        let a = MasterKey::derive("pw", b"salt1", MIN_PBKDF2_ITERATIONS);
        let b = MasterKey::derive("pw", b"salt2", MIN_PBKDF2_ITERATIONS);
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn iteration_count_is_floored_at_the_minimum() {
        let low = MasterKey::derive("pw", b"salt", 10);
        let floor = MasterKey::derive("pw", b"salt", MIN_PBKDF2_ITERATIONS);
        assert_eq!(low.0, floor.0);
    }
}
