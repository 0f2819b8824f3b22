use rand::{rngs::OsRng, Rng};

/// Hex encoding of `len` bytes drawn from the OS generator.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill(bytes.as_mut_slice());
    hex::encode(bytes)
}

/// 24 hex characters, the identifier shape used for users and files.
pub fn random_id() -> String {
    random_hex(12)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_hex_and_distinct() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
