/// Secret generation and hashing primitives
///
/// Password hashing lives in [`password`]; this module produces the random
/// secrets (one-time codes, invitation codes, session tokens) and the digest
/// used to store session tokens at rest.

pub mod password;

use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

/// Generate a random alphanumeric secret of `length` characters
pub fn generate_secret(length: usize) -> String {
    // thread_rng is a CSPRNG seeded from the OS
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Hex-encoded SHA-256 digest of a session token
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_secret_length_and_charset() {
        let secret = generate_secret(24);
        assert_eq!(secret.len(), 24);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_secrets_are_unique() {
        let secrets: HashSet<String> = (0..100).map(|_| generate_secret(16)).collect();
        assert_eq!(secrets.len(), 100);
    }

    #[test]
    fn test_token_digest_is_stable() {
        assert_eq!(token_digest("abc"), token_digest("abc"));
        assert_ne!(token_digest("abc"), token_digest("abd"));
        assert_eq!(token_digest("abc").len(), 64);
    }
}
