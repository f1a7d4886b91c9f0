//! Argon2id password hashing.
//!
//! Hashes are PHC strings (`$argon2id$v=19$m=..,t=..,p=..$salt$key`), so the
//! cost parameters travel with each hash and can be raised without a
//! migration. Verification re-derives the key with the stored salt and
//! parameters and compares in constant time.

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, Version};
use rand::RngCore;
use std::sync::{Arc, OnceLock};
use subtle::ConstantTimeEq;
use tracing::{debug, error};

use super::errors::{AuthError, AuthResult};

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes
pub const KEY_LEN: usize = 32;

/// Password the dummy hash is derived from; never a valid credential
const DUMMY_PASSWORD: &str = "tokenward-timing-equalization";

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl HashParams {
    /// Cheap parameters for tests
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: Params::MIN_M_COST.max(8 * 1024),
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Build argon2 params, rejecting values the KDF cannot run with
    pub fn to_argon2(self) -> Result<Params, argon2::Error> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
    }
}

/// Password hasher and verifier
#[derive(Clone)]
pub struct PasswordHasher {
    params: HashParams,
    dummy_hash: Arc<OnceLock<Option<String>>>,
}

impl PasswordHasher {
    /// Create a hasher
    ///
    /// # Errors
    ///
    /// * `AuthError::Internal` - Parameters rejected by argon2
    pub fn new(params: HashParams) -> AuthResult<Self> {
        params
            .to_argon2()
            .map_err(|e| AuthError::Internal(format!("invalid argon2 parameters: {e}")))?;
        Ok(Self {
            params,
            dummy_hash: Arc::new(OnceLock::new()),
        })
    }

    pub fn params(&self) -> HashParams {
        self.params
    }

    /// Hash a password with a fresh random salt
    ///
    /// # Returns
    ///
    /// * `AuthResult<String>` - PHC-encoded hash
    pub fn hash(&self, password: &str) -> AuthResult<String> {
        let params = self
            .params
            .to_argon2()
            .map_err(|e| AuthError::Internal(format!("invalid argon2 parameters: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut salt_bytes = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AuthError::Internal(format!("salt encoding failed: {e}")))?;

        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))?;
        Ok(hash.to_string())
    }

    /// Verify a password against a stored PHC hash
    ///
    /// Malformed or unsupported hashes return `false`. For a well-formed
    /// hash the full derivation always runs before the comparison.
    pub fn verify(&self, encoded: &str, password: &str) -> bool {
        match recompute(encoded, password) {
            Some((computed, expected)) => bool::from(computed.as_slice().ct_eq(&expected)),
            None => {
                debug!("Stored password hash is malformed");
                false
            }
        }
    }

    /// Burn one derivation against a fixed hash
    ///
    /// Used when the account does not exist so that path costs the same as
    /// a wrong password.
    pub fn verify_dummy(&self, password: &str) {
        let dummy = self.dummy_hash.get_or_init(|| match self.hash(DUMMY_PASSWORD) {
            Ok(hash) => Some(hash),
            Err(e) => {
                error!(error = %e, "Failed to build dummy password hash");
                None
            }
        });
        if let Some(dummy) = dummy {
            let _ = self.verify(dummy, password);
        }
    }
}

/// Re-derive the key for `password` with the parameters in `encoded`
///
/// Returns `(computed, expected)` or `None` when `encoded` cannot be used.
fn recompute(encoded: &str, password: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    let parsed = PasswordHash::new(encoded).ok()?;
    let algorithm = Algorithm::try_from(parsed.algorithm).ok()?;
    let version = match parsed.version {
        Some(v) => Version::try_from(v).ok()?,
        None => Version::default(),
    };
    let params = Params::try_from(&parsed).ok()?;

    let expected = parsed.hash?.as_bytes().to_vec();
    let mut salt_buf = [0u8; 64];
    let salt = parsed.salt?.decode_b64(&mut salt_buf).ok()?;

    let mut computed = vec![0u8; expected.len()];
    Argon2::new(algorithm, version, params)
        .hash_password_into(password.as_bytes(), salt, &mut computed)
        .ok()?;
    Some((computed, expected))
}
