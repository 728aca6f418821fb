//! Common error types for the Stout runtime.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`StoutError`].
pub type StoutResult<T> = Result<T, StoutError>;

/// Common errors across the Stout runtime.
#[derive(Error, Diagnostic, Debug)]
pub enum StoutError {
    /// Image reference could not be parsed.
    #[error("Invalid image reference: {reference:?}")]
    #[diagnostic(
        code(stout::reference::invalid),
        help("References look like [registry/][namespace/]name[:tag], e.g. alpine:latest")
    )]
    InvalidReference {
        /// The reference that failed to parse.
        reference: String,
    },

    /// Digest does not have the required form.
    #[error("Invalid digest: {digest}")]
    #[diagnostic(
        code(stout::digest::invalid),
        help("Digests must have the form sha256:<64 lowercase hex characters>")
    )]
    InvalidDigest {
        /// The offending digest string.
        digest: String,
    },

    /// No endpoint is configured for the registry host.
    #[error("Unknown registry: {host}")]
    #[diagnostic(code(stout::registry::unknown))]
    UnknownRegistry {
        /// The registry host from the image reference.
        host: String,
    },

    /// A 401 response carried no `WWW-Authenticate` header.
    #[error("Registry denied the request without an authentication challenge")]
    #[diagnostic(code(stout::auth::missing_challenge))]
    MissingChallenge,

    /// The `WWW-Authenticate` header could not be parsed.
    #[error("Malformed authentication challenge: {header:?}")]
    #[diagnostic(code(stout::auth::malformed_challenge))]
    MalformedChallenge {
        /// The raw header value.
        header: String,
    },

    /// The token realm could not be reached or returned an error status.
    #[error("Token exchange failed: {message}")]
    #[diagnostic(code(stout::auth::http))]
    AuthHttp {
        /// What went wrong talking to the realm.
        message: String,
    },

    /// The token response body was not usable.
    #[error("Token response could not be decoded: {message}")]
    #[diagnostic(code(stout::auth::decode))]
    AuthDecode {
        /// What was wrong with the body.
        message: String,
    },

    /// The registry rejected the request even after a token exchange.
    #[error("Unauthorized by registry {registry}")]
    #[diagnostic(
        code(stout::auth::unauthorized),
        help("The repository may be private or the scope may not grant pull access")
    )]
    Unauthorized {
        /// The registry that rejected the request.
        registry: String,
    },

    /// The registry returned a media type this runtime does not consume.
    #[error("Unsupported media type: {media_type}")]
    #[diagnostic(code(stout::manifest::unsupported_media_type))]
    UnsupportedMediaType {
        /// The media type from the response.
        media_type: String,
    },

    /// No manifest in the index matches the host platform.
    #[error("No manifest matches {os}/{architecture}")]
    #[diagnostic(code(stout::manifest::no_platform_match))]
    NoPlatformMatch {
        /// Host operating system.
        os: String,
        /// Host architecture (OCI naming).
        architecture: String,
    },

    /// Downloaded bytes hash to something other than the descriptor digest.
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    #[diagnostic(code(stout::layer::digest_mismatch))]
    DigestMismatch {
        /// The digest the descriptor promised.
        expected: String,
        /// The digest the bytes produced.
        actual: String,
    },

    /// Downloaded byte count diverges from the descriptor size.
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    #[diagnostic(code(stout::layer::size_mismatch))]
    SizeMismatch {
        /// The size the descriptor promised.
        expected: u64,
        /// The number of bytes received.
        actual: u64,
    },

    /// The layer batch kept failing until retries ran out.
    #[error("Failed to fetch image layers after {attempts} attempts")]
    #[diagnostic(code(stout::layer::fetch_failed))]
    LayerFetchFailed {
        /// How many batch attempts were made.
        attempts: u32,
    },

    /// Applying a layer to the root filesystem failed.
    #[error("Rootfs assembly failed: {message}")]
    #[diagnostic(code(stout::rootfs::assembly_failed))]
    AssemblyFailed {
        /// What failed while applying layers.
        message: String,
    },

    /// Setting up namespaces, chroot or exec failed.
    #[error("Process isolation failed: {message}")]
    #[diagnostic(
        code(stout::isolate::failed),
        help("chroot and unshare require elevated privileges; try running as root")
    )]
    IsolationFailed {
        /// What failed while isolating the child.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(stout::io))]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    #[diagnostic(code(stout::http))]
    Http(#[from] reqwest::Error),

    /// JSON decoding error.
    #[error("Decode error: {0}")]
    #[diagnostic(code(stout::decode))]
    Decode(String),

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(stout::internal),
        help("This is a bug, please report it at https://github.com/stout-containers/stout/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl From<serde_json::Error> for StoutError {
    fn from(err: serde_json::Error) -> Self {
        StoutError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoutError::NoPlatformMatch {
            os: "linux".to_string(),
            architecture: "amd64".to_string(),
        };
        assert_eq!(err.to_string(), "No manifest matches linux/amd64");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StoutError = io_err.into();
        assert!(matches!(err, StoutError::Io(_)));
    }

    #[test]
    fn error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StoutError = json_err.into();
        assert!(matches!(err, StoutError::Decode(_)));
    }
}
