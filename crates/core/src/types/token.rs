//! Download redemption tokens.
//!
//! A token is the bearer capability for fetching a purchased artifact: 32
//! bytes of OS randomness, hex-encoded to 64 characters (256 bits of
//! entropy, infeasible to guess). Tokens are looked up verbatim in the
//! store; `Debug` redacts all but a short prefix so a stray log line never
//! leaks a usable capability.

use core::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Number of random bytes in a freshly minted token.
pub const TOKEN_BYTES: usize = 32;

/// Hex-encoded length of a valid token.
pub const TOKEN_LEN: usize = TOKEN_BYTES * 2;

/// Errors from parsing a candidate token string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token must be exactly {TOKEN_LEN} characters (got {0})")]
    BadLength(usize),
    #[error("token must be lowercase hex")]
    BadCharset,
}

/// An unguessable download redemption token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadToken(String);

impl DownloadToken {
    /// Mint a fresh token from OS randomness.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Validate a candidate token received from a caller.
    ///
    /// # Errors
    ///
    /// Returns `TokenError` if the candidate has the wrong length or is not
    /// lowercase hex. Rejecting malformed candidates up front keeps junk
    /// input out of store lookups; it says nothing about whether the token
    /// exists.
    pub fn parse(candidate: &str) -> Result<Self, TokenError> {
        if candidate.len() != TOKEN_LEN {
            return Err(TokenError::BadLength(candidate.len()));
        }
        if !candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(TokenError::BadCharset);
        }
        Ok(Self(candidate.to_owned()))
    }

    /// The token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DownloadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.0.get(..8).unwrap_or(&self.0);
        write!(f, "DownloadToken({prefix}…)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_shape() {
        let token = DownloadToken::generate();
        assert_eq!(token.as_str().len(), TOKEN_LEN);
        assert!(
            token
                .as_str()
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        );
    }

    #[test]
    fn test_generate_unique() {
        let a = DownloadToken::generate();
        let b = DownloadToken::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_roundtrip() {
        let token = DownloadToken::generate();
        let parsed = DownloadToken::parse(token.as_str()).expect("valid token");
        assert_eq!(parsed, token);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            DownloadToken::parse("abc"),
            Err(TokenError::BadLength(3))
        );
        let uppercase = "A".repeat(TOKEN_LEN);
        assert_eq!(
            DownloadToken::parse(&uppercase),
            Err(TokenError::BadCharset)
        );
    }

    #[test]
    fn test_debug_redacts() {
        let token = DownloadToken::generate();
        let debug = format!("{token:?}");
        assert!(!debug.contains(token.as_str()));
    }
}
