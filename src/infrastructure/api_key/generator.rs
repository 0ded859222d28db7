//! API Key generation
//!
//! Generates cryptographically secure agent API keys and parses the lookup
//! prefix back out of presented secrets.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;

/// Length of the random fragment kept in the lookup prefix
pub const PREFIX_RANDOM_CHARS: usize = 8;

/// Result of generating a new API key
#[derive(Debug, Clone)]
pub struct GeneratedApiKey {
    /// The full API key (only shown once at creation)
    pub secret: String,
    /// The key prefix for identification and lookup
    pub prefix: String,
}

/// Generator for secure API keys
#[derive(Debug, Clone)]
pub struct ApiKeyGenerator {
    /// Prefix for all generated keys (e.g., "sk_live_", "sk_test_")
    prefix: String,
    /// Number of random bytes to generate
    key_bytes: usize,
}

impl ApiKeyGenerator {
    /// Create a new API key generator
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            key_bytes: 48,
        }
    }

    /// Create a generator for production keys
    pub fn live() -> Self {
        Self::new("sk_live_")
    }

    /// Create a generator for test keys
    pub fn test() -> Self {
        Self::new("sk_test_")
    }

    /// Set the number of random bytes
    pub fn with_key_bytes(mut self, bytes: usize) -> Self {
        self.key_bytes = bytes.max(PREFIX_RANDOM_CHARS);
        self
    }

    /// Generate a new API key
    pub fn generate(&self) -> GeneratedApiKey {
        let mut random_bytes = vec![0u8; self.key_bytes];
        rand::thread_rng().fill_bytes(&mut random_bytes);

        let encoded = URL_SAFE_NO_PAD.encode(&random_bytes);
        let secret = format!("{}{}", self.prefix, encoded);
        let prefix = format!("{}{}", self.prefix, &encoded[..PREFIX_RANDOM_CHARS]);

        GeneratedApiKey { secret, prefix }
    }

    /// Extract the lookup prefix (`sk_<env>_` + 8 random chars) from a key
    ///
    /// Returns `None` for anything not shaped like an issued key; such
    /// input never needs a store lookup.
    pub fn extract_prefix(key: &str) -> Option<&str> {
        let rest = key.strip_prefix("sk_")?;
        let env_len = rest.find('_')?;
        let env = &rest[..env_len];

        if env.is_empty() || !env.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }

        let random_start = "sk_".len() + env_len + 1;
        let random = &key[random_start..];

        if random.len() < PREFIX_RANDOM_CHARS || !random.bytes().all(is_base64url) {
            return None;
        }

        Some(&key[..random_start + PREFIX_RANDOM_CHARS])
    }
}

fn is_base64url(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

impl Default for ApiKeyGenerator {
    fn default() -> Self {
        Self::live()
    }
}
