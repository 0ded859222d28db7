//! Secret hashing for stored API keys
//!
//! Two self-describing formats are supported. `hmac-sha256$<b64>` is a
//! peppered HMAC, fast enough for the per-request path since the secrets
//! carry 384 bits of entropy. Argon2 PHC strings are accepted for stores
//! that prefer a slow, salted hash.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt::Debug;

use crate::domain::DomainError;

type HmacSha256 = Hmac<Sha256>;

const HMAC_SCHEME: &str = "hmac-sha256$";

/// Trait for one-way API key hashing
pub trait KeyHasher: Send + Sync + Debug {
    /// Hash a presented secret for storage
    fn hash(&self, secret: &str) -> Result<String, DomainError>;

    /// Verify a secret against a stored hash in constant time
    fn verify(&self, secret: &str, stored: &str) -> bool;
}

/// HMAC-SHA256 hasher keyed with a server-side pepper
pub struct HmacKeyHasher {
    pepper: Vec<u8>,
}

impl HmacKeyHasher {
    pub fn new(pepper: impl AsRef<[u8]>) -> Result<Self, DomainError> {
        let pepper = pepper.as_ref();
        if pepper.is_empty() {
            return Err(DomainError::configuration("Hash pepper cannot be empty"));
        }

        Ok(Self {
            pepper: pepper.to_vec(),
        })
    }

    fn mac(&self) -> Option<HmacSha256> {
        HmacSha256::new_from_slice(&self.pepper).ok()
    }
}

impl Debug for HmacKeyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacKeyHasher")
            .field("pepper", &"[REDACTED]")
            .finish()
    }
}

impl KeyHasher for HmacKeyHasher {
    fn hash(&self, secret: &str) -> Result<String, DomainError> {
        if secret.is_empty() {
            return Err(DomainError::validation("Cannot hash an empty API key"));
        }

        let mut mac = self
            .mac()
            .ok_or_else(|| DomainError::internal("Failed to initialise HMAC"))?;
        mac.update(secret.as_bytes());

        Ok(format!(
            "{}{}",
            HMAC_SCHEME,
            URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
        ))
    }

    fn verify(&self, secret: &str, stored: &str) -> bool {
        if secret.is_empty() {
            return false;
        }

        let Some(encoded) = stored.strip_prefix(HMAC_SCHEME) else {
            return false;
        };

        let Ok(expected) = URL_SAFE_NO_PAD.decode(encoded) else {
            return false;
        };

        let Some(mut mac) = self.mac() else {
            return false;
        };
        mac.update(secret.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

/// Argon2-based key hasher
#[derive(Debug, Clone, Default)]
pub struct Argon2KeyHasher;

impl Argon2KeyHasher {
    pub fn new() -> Self {
        Self
    }
}

impl KeyHasher for Argon2KeyHasher {
    fn hash(&self, secret: &str) -> Result<String, DomainError> {
        if secret.is_empty() {
            return Err(DomainError::validation("Cannot hash an empty API key"));
        }

        let salt = SaltString::generate(&mut OsRng);

        Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| DomainError::internal(format!("Failed to hash API key: {}", e)))
    }

    fn verify(&self, secret: &str, stored: &str) -> bool {
        if secret.is_empty() {
            return false;
        }

        let parsed_hash = match PasswordHash::new(stored) {
            Ok(h) => h,
            Err(_) => return false,
        };

        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed_hash)
            .is_ok()
    }
}
