//! Standard filesystem paths for Stout.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for the layer cache.
pub static STOUT_CACHE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("STOUT_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("containers").join("layers"))
});

/// Prefix for per-invocation scratch directories under the system temp root.
pub const SCRATCH_PREFIX: &str = "container.";

/// Standard paths used by the Stout runtime.
#[derive(Debug, Clone)]
pub struct StoutPaths {
    /// Layer cache directory (default: `<tmp>/containers/layers`).
    pub cache: PathBuf,
}

impl StoutPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom cache directory.
    #[must_use]
    pub fn with_cache(cache: impl Into<PathBuf>) -> Self {
        Self {
            cache: cache.into(),
        }
    }

    /// Cached blob file for a layer id (the hex stem of its digest).
    #[must_use]
    pub fn layer(&self, layer_id: &str) -> PathBuf {
        self.cache.join(format!("{layer_id}.tar.gz"))
    }

    /// Create the cache directory.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cache)
    }
}

impl Default for StoutPaths {
    fn default() -> Self {
        Self {
            cache: STOUT_CACHE_DIR.clone(),
        }
    }
}
