//! Content digests.

use std::str::FromStr;

use serde::Deserialize;
use stout_common::{StoutError, StoutResult};

/// A validated `sha256:<64 lowercase hex>` content digest.
///
/// The hex stem doubles as the layer id used for cache filenames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Digest(String);

impl Digest {
    /// Parse and validate a digest string.
    pub fn parse(digest: &str) -> StoutResult<Self> {
        let hex = digest
            .strip_prefix("sha256:")
            .ok_or_else(|| StoutError::InvalidDigest {
                digest: digest.to_string(),
            })?;

        let well_formed =
            hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed {
            return Err(StoutError::InvalidDigest {
                digest: digest.to_string(),
            });
        }

        Ok(Self(digest.to_string()))
    }

    /// The full `sha256:<hex>` form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex stem, used as the cache filename.
    #[must_use]
    pub fn layer_id(&self) -> &str {
        &self.0["sha256:".len()..]
    }
}

impl FromStr for Digest {
    type Err = StoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = StoutError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn parse_valid() {
        let digest = Digest::parse(&format!("sha256:{HEX}")).unwrap();
        assert_eq!(digest.layer_id(), HEX);
        assert_eq!(digest.as_str(), format!("sha256:{HEX}"));
    }

    #[test]
    fn rejects_missing_algorithm() {
        assert!(Digest::parse(HEX).is_err());
    }

    #[test]
    fn rejects_wrong_algorithm() {
        assert!(Digest::parse(&format!("sha512:{HEX}")).is_err());
    }

    #[test]
    fn rejects_short_hex() {
        assert!(Digest::parse("sha256:abc123").is_err());
    }

    #[test]
    fn rejects_uppercase_hex() {
        assert!(Digest::parse(&format!("sha256:{}", HEX.to_uppercase())).is_err());
    }

    #[test]
    fn rejects_non_hex() {
        let bad = format!("sha256:{}", "z".repeat(64));
        assert!(matches!(
            Digest::parse(&bad),
            Err(StoutError::InvalidDigest { .. })
        ));
    }
}
