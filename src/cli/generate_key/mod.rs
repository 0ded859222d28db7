//! Generate-key command - prints a secret, its lookup prefix and stored hash

use anyhow::Context;
use clap::{Args, ValueEnum};

use crate::config::{AppConfig, HasherKind, DEV_HASH_PEPPER};
use crate::infrastructure::api_key::{
    ApiKeyGenerator, Argon2KeyHasher, GeneratedApiKey, HmacKeyHasher, KeyHasher,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyEnv {
    Live,
    Test,
}

/// Arguments for the generate-key command
#[derive(Args, Clone, Debug)]
pub struct GenerateKeyArgs {
    /// Key environment marker embedded in the secret
    #[arg(long, value_enum, default_value = "live")]
    pub env: KeyEnv,
}

/// Run the key generator
pub async fn run(args: GenerateKeyArgs) -> anyhow::Result<()> {
    // A hash made with the fallback pepper would never verify in production
    let config = AppConfig::load().context("Failed to load configuration")?;

    let generated = generate(args.env);
    let hash = hash_with_configured_hasher(&config, &generated.secret)?;

    println!("secret: {}", generated.secret);
    println!("prefix: {}", generated.prefix);
    println!("hash:   {}", hash);

    Ok(())
}

fn generate(env: KeyEnv) -> GeneratedApiKey {
    match env {
        KeyEnv::Live => ApiKeyGenerator::live().generate(),
        KeyEnv::Test => ApiKeyGenerator::test().generate(),
    }
}

fn hash_with_configured_hasher(config: &AppConfig, secret: &str) -> anyhow::Result<String> {
    let hash = match config.gateway.hasher {
        HasherKind::Hmac => {
            let pepper = config
                .gateway
                .hash_pepper
                .as_deref()
                .unwrap_or(DEV_HASH_PEPPER);
            HmacKeyHasher::new(pepper)?.hash(secret)?
        }
        HasherKind::Argon2 => Argon2KeyHasher::new().hash(secret)?,
    };

    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_per_env() {
        assert!(generate(KeyEnv::Live).secret.starts_with("sk_live_"));
        assert!(generate(KeyEnv::Test).secret.starts_with("sk_test_"));
    }

    #[test]
    fn test_hash_verifies_with_same_pepper() {
        let mut config = AppConfig::default();
        config.gateway.hash_pepper = Some("cli-pepper".to_string());

        let generated = generate(KeyEnv::Live);
        let hash = hash_with_configured_hasher(&config, &generated.secret).unwrap();

        let hasher = HmacKeyHasher::new("cli-pepper").unwrap();
        assert!(hasher.verify(&generated.secret, &hash));
    }
}
