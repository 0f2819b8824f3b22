use anyhow::{anyhow, Context, Result};
use rand::{rngs::OsRng, Rng};
use ring::{digest::SHA256_OUTPUT_LEN, pbkdf2};
use std::num::NonZeroU32;

const SCHEME: &str = "pbkdf2-sha256";
const ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;

static ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Encodes as `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`.
pub fn hash_password(password: &str) -> Result<String> {
    hash_with_iterations(password, ITERATIONS)
}

fn hash_with_iterations(password: &str, iterations: u32) -> Result<String> {
    let rounds = NonZeroU32::new(iterations).ok_or_else(|| anyhow!("iterations must be non-zero"))?;
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill(&mut salt);

    let mut derived = [0u8; SHA256_OUTPUT_LEN];
    pbkdf2::derive(ALGORITHM, rounds, &salt, password.as_bytes(), &mut derived);

    Ok(format!(
        "{SCHEME}${iterations}${}${}",
        hex::encode(salt),
        hex::encode(derived)
    ))
}

pub fn verify_password(password: &str, encoded: &str) -> Result<bool> {
    let mut parts = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(anyhow!("malformed password hash"));
    };
    if scheme != SCHEME {
        return Err(anyhow!("unsupported password scheme {scheme}"));
    }

    let iterations: u32 = iterations.parse().context("invalid iteration count")?;
    let rounds = NonZeroU32::new(iterations).ok_or_else(|| anyhow!("iterations must be non-zero"))?;
    let salt = hex::decode(salt).context("invalid salt encoding")?;
    let hash = hex::decode(hash).context("invalid hash encoding")?;

    Ok(pbkdf2::verify(ALGORITHM, rounds, &salt, password.as_bytes(), &hash).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_matching_password_only() {
        let encoded = hash_with_iterations("hunter22", 1_000).unwrap();
        assert!(encoded.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_password("hunter22", &encoded).unwrap());
        assert!(!verify_password("hunter23", &encoded).unwrap());
    }

    #[test]
    fn salts_differ_between_hashes() {
        let a = hash_with_iterations("same", 1_000).unwrap();
        let b = hash_with_iterations("same", 1_000).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("x", "plaintext").is_err());
        assert!(verify_password("x", "md5$1$00$00").is_err());
        assert!(verify_password("x", "pbkdf2-sha256$0$00$00").is_err());
    }
}
