//! Image reference parsing.

use std::str::FromStr;

use stout_common::{StoutError, StoutResult};

/// A parsed image reference.
///
/// Immutable once parsed; the canonical rendering is
/// `registry/repository:tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname.
    pub registry: String,
    /// Repository name.
    pub repository: String,
    /// Tag.
    pub tag: String,
}

impl ImageReference {
    /// Default registry.
    pub const DEFAULT_REGISTRY: &'static str = "docker.io";
    /// Default tag.
    pub const DEFAULT_TAG: &'static str = "latest";

    /// Parse an image reference string.
    ///
    /// Examples:
    /// - `alpine` -> docker.io/library/alpine:latest
    /// - `alpine:3.19` -> docker.io/library/alpine:3.19
    /// - `gcr.io/distroless/static:nonroot` -> gcr.io/distroless/static:nonroot
    pub fn parse(reference: &str) -> StoutResult<Self> {
        if reference.is_empty() {
            return Err(StoutError::InvalidReference {
                reference: reference.to_string(),
            });
        }

        // A leading component is a registry only when it could be a host:
        // it must contain a dot or a port colon. Anything else (e.g. a
        // Docker Hub user name) belongs to the repository.
        let (registry, mut remainder) = match reference.find('/') {
            Some(idx) if reference[..idx].contains(['.', ':']) => {
                (&reference[..idx], reference[idx + 1..].to_string())
            }
            _ => (Self::DEFAULT_REGISTRY, reference.to_string()),
        };

        if registry == Self::DEFAULT_REGISTRY && !remainder.starts_with("library/") {
            remainder.insert_str(0, "library/");
        }

        let (repository, tag) = match remainder.rfind(':') {
            Some(idx) => {
                let tag = remainder[idx + 1..].to_string();
                remainder.truncate(idx);
                (remainder, tag)
            }
            None => (remainder, Self::DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            registry: registry.to_string(),
            repository,
            tag,
        })
    }

    /// Get the canonical reference string.
    #[must_use]
    pub fn full_reference(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl FromStr for ImageReference {
    type Err = StoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let ref_ = ImageReference::parse("alpine").unwrap();
        assert_eq!(ref_.registry, "docker.io");
        assert_eq!(ref_.repository, "library/alpine");
        assert_eq!(ref_.tag, "latest");
    }

    #[test]
    fn parse_with_tag() {
        let ref_ = ImageReference::parse("alpine:3.19").unwrap();
        assert_eq!(ref_.registry, "docker.io");
        assert_eq!(ref_.repository, "library/alpine");
        assert_eq!(ref_.tag, "3.19");
    }

    #[test]
    fn parse_user_repo_gets_library_prefix() {
        // Any default-registry repository not already under library/ is
        // prefixed, matching the familiarisation rule.
        let ref_ = ImageReference::parse("myuser/myapp").unwrap();
        assert_eq!(ref_.registry, "docker.io");
        assert_eq!(ref_.repository, "library/myuser/myapp");
        assert_eq!(ref_.tag, "latest");
    }

    #[test]
    fn parse_custom_registry() {
        let ref_ = ImageReference::parse("gcr.io/distroless/static:nonroot").unwrap();
        assert_eq!(ref_.registry, "gcr.io");
        assert_eq!(ref_.repository, "distroless/static");
        assert_eq!(ref_.tag, "nonroot");
    }

    #[test]
    fn parse_registry_with_port() {
        let ref_ = ImageReference::parse("localhost:5000/myimage").unwrap();
        assert_eq!(ref_.registry, "localhost:5000");
        assert_eq!(ref_.repository, "myimage");
        assert_eq!(ref_.tag, "latest");
    }

    #[test]
    fn parse_explicit_library() {
        let ref_ = ImageReference::parse("library/alpine:edge").unwrap();
        assert_eq!(ref_.repository, "library/alpine");
        assert_eq!(ref_.tag, "edge");
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(matches!(
            ImageReference::parse(""),
            Err(StoutError::InvalidReference { .. })
        ));
    }

    #[test]
    fn parse_is_idempotent() {
        for raw in ["alpine", "alpine:3.19", "gcr.io/distroless/static:nonroot"] {
            let once = ImageReference::parse(raw).unwrap();
            let twice = ImageReference::parse(&once.full_reference()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn display_is_canonical() {
        let ref_ = ImageReference::parse("alpine").unwrap();
        assert_eq!(ref_.to_string(), "docker.io/library/alpine:latest");
    }
}
