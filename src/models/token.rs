use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Random bytes behind each extension token (hex-encoded on the wire).
pub const TOKEN_BYTES: usize = 16;

/// Single-use permission to extend one environment's deadline.
/// Keyed by `env_id`: at most one live token per environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Token {
    pub env_id: String,
    pub token: String,
}

impl Token {
    pub fn generate(env_id: &str) -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            env_id: env_id.to_string(),
            token: hex::encode(bytes),
        }
    }

    /// Exact byte-for-byte comparison, constant time.
    pub fn matches(&self, presented: &str) -> bool {
        self.token.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_hex_and_unique() {
        let a = Token::generate("env");
        let b = Token::generate("env");
        assert_eq!(a.token.len(), TOKEN_BYTES * 2);
        assert!(a.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_matches_is_exact() {
        let t = Token {
            env_id: "env".into(),
            token: "abcdef".into(),
        };
        assert!(t.matches("abcdef"));
        assert!(!t.matches("ABCDEF"));
        assert!(!t.matches("abcde"));
        assert!(!t.matches(""));
    }
}
