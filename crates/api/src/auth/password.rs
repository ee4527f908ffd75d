//! Password hashing and verification
//!
//! New digests are Argon2id PHC strings with a random salt. Verification also
//! accepts bcrypt digests carried over from the previous deployment's `accounts`
//! table, so existing users can still sign in.
//!
//! Logins go through [`CredentialVerifier`], which runs one Argon2 and one bcrypt
//! verification on every call. A wrong password for an Argon2 account, for a
//! legacy bcrypt account, and a guess for a user that does not exist all cost
//! the same.

use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2,
};

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    Hash(String),
}

const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

/// Cost of the legacy bcrypt digests in the `accounts` table
pub const LEGACY_BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Argon2,
    Bcrypt,
}

fn scheme_of(hash: &str) -> Option<Scheme> {
    if BCRYPT_PREFIXES.iter().any(|prefix| hash.starts_with(prefix)) {
        Some(Scheme::Bcrypt)
    } else if hash.starts_with("$argon2") {
        Some(Scheme::Argon2)
    } else {
        None
    }
}

/// Hash a password with Argon2id and a fresh random salt
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Check a password against a stored digest
///
/// Comparison is done by the hashing scheme in constant time. A malformed or
/// unsupported digest is a mismatch, never an error.
pub fn verify_password(password: &str, hash: &str) -> bool {
    if scheme_of(hash) == Some(Scheme::Bcrypt) {
        return bcrypt::verify(password, hash).unwrap_or(false);
    }

    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("Stored password digest is not a valid PHC string");
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Digest of random bytes that no password will ever match
///
/// Verifying against it costs the same as a real check, which keeps the
/// unknown-user path indistinguishable from a wrong password by timing.
pub fn generate_impossible_hash() -> Result<String, PasswordError> {
    let mut random = [0u8; 32];
    OsRng.fill_bytes(&mut random);
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(&random, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Bcrypt counterpart of [`generate_impossible_hash`], at the legacy cost
pub fn generate_impossible_bcrypt_hash() -> Result<String, PasswordError> {
    let mut random = [0u8; 32];
    OsRng.fill_bytes(&mut random);
    bcrypt::hash(random, LEGACY_BCRYPT_COST).map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Password check with a uniform cost across account schemes and unknown users
pub struct CredentialVerifier {
    argon2_dummy: String,
    bcrypt_dummy: String,
}

impl CredentialVerifier {
    pub fn new() -> Result<Self, PasswordError> {
        Ok(Self {
            argon2_dummy: generate_impossible_hash()?,
            bcrypt_dummy: generate_impossible_bcrypt_hash()?,
        })
    }

    /// Check `password` against the account's digest, or `None` for an unknown user
    ///
    /// The real digest is checked with its own scheme and a dummy digest with the
    /// other one. Unknown users and unrecognised digests check both dummies.
    pub fn verify(&self, password: &str, digest: Option<&str>) -> bool {
        let (matched, pad) = match digest.map(|d| (d, scheme_of(d))) {
            Some((digest, Some(Scheme::Argon2))) => {
                (verify_password(password, digest), vec![&self.bcrypt_dummy])
            }
            Some((digest, Some(Scheme::Bcrypt))) => {
                (verify_password(password, digest), vec![&self.argon2_dummy])
            }
            Some((_, None)) | None => (false, vec![&self.argon2_dummy, &self.bcrypt_dummy]),
        };

        for dummy in pad {
            std::hint::black_box(verify_password(password, dummy));
        }
        matched
    }
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier").finish_non_exhaustive()
    }
}
