//! Content-addressed on-disk layer cache.
//!
//! Each cached layer is a file at `<cache_root>/<layer_id>.tar.gz` whose
//! SHA-256 equals the descriptor digest. Writes land on a `.partial` file
//! and are renamed into place only after verification, so readers never
//! observe a half-written entry.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use stout_common::{StoutError, StoutPaths, StoutResult};

use crate::digest::Digest;

/// Content-addressed store for compressed layer blobs.
///
/// No eviction, size cap or expiry; the runtime is single-invocation.
#[derive(Debug, Clone)]
pub struct LayerCache {
    paths: StoutPaths,
}

impl LayerCache {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> StoutResult<Self> {
        let paths = StoutPaths::with_cache(root);
        paths.create_dirs()?;
        Ok(Self { paths })
    }

    /// Path a layer would occupy, whether or not it is present.
    #[must_use]
    pub fn layer_path(&self, digest: &Digest) -> PathBuf {
        self.paths.layer(digest.layer_id())
    }

    /// Look up a layer, re-hashing the file to verify it.
    ///
    /// A file that is missing or fails verification yields `None`; a corrupt
    /// file is left in place and will be overwritten by the next write.
    pub fn lookup(&self, digest: &Digest) -> StoutResult<Option<PathBuf>> {
        let path = self.layer_path(digest);
        if !path.exists() {
            return Ok(None);
        }

        let actual = hash_file(&path)?;
        if actual == digest.as_str() {
            tracing::debug!(digest = %digest, "Layer cache hit");
            Ok(Some(path))
        } else {
            tracing::warn!(
                digest = %digest,
                actual = %actual,
                path = %path.display(),
                "Cached layer failed verification; will re-fetch"
            );
            Ok(None)
        }
    }

    /// Open a write handle for a layer download.
    pub fn writer(&self, digest: &Digest) -> StoutResult<CacheWriter> {
        let target = self.layer_path(digest);
        let partial = target.with_extension("gz.partial");

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&partial)?;

        Ok(CacheWriter {
            inner: BufWriter::new(file),
            hasher: Sha256::new(),
            written: 0,
            partial,
            target,
        })
    }
}

/// In-progress write of one layer blob.
///
/// Bytes stream through a SHA-256 hasher into a buffered `.partial` file;
/// [`CacheWriter::commit`] verifies size and digest before renaming the file
/// into its content-addressed location.
pub struct CacheWriter {
    inner: BufWriter<File>,
    hasher: Sha256,
    written: u64,
    partial: PathBuf,
    target: PathBuf,
}

impl CacheWriter {
    /// Append a chunk of the response body.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> StoutResult<()> {
        self.hasher.update(chunk);
        self.inner.write_all(chunk)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Verify the download against its descriptor and publish it.
    ///
    /// On any failure the partial file is removed and no cache entry appears.
    pub fn commit(mut self, expected: &Digest, expected_size: u64) -> StoutResult<PathBuf> {
        self.inner.flush()?;
        drop(self.inner);

        if self.written != expected_size {
            let _ = std::fs::remove_file(&self.partial);
            return Err(StoutError::SizeMismatch {
                expected: expected_size,
                actual: self.written,
            });
        }

        let actual = format!("sha256:{:x}", self.hasher.finalize());
        if actual != expected.as_str() {
            let _ = std::fs::remove_file(&self.partial);
            return Err(StoutError::DigestMismatch {
                expected: expected.as_str().to_string(),
                actual,
            });
        }

        std::fs::rename(&self.partial, &self.target)?;
        tracing::debug!(digest = %expected, path = %self.target.display(), "Layer cached");
        Ok(self.target)
    }
}

/// SHA-256 of a file's contents, in `sha256:<hex>` form.
fn hash_file(path: &Path) -> StoutResult<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::Digest as _;
    use tempfile::tempdir;

    fn digest_of(data: &[u8]) -> Digest {
        Digest::parse(&format!("sha256:{:x}", Sha256::digest(data))).unwrap()
    }

    #[test]
    fn write_then_lookup() {
        let temp = tempdir().unwrap();
        let cache = LayerCache::new(temp.path()).unwrap();
        let data = b"layer bytes";
        let digest = digest_of(data);

        let mut writer = cache.writer(&digest).unwrap();
        writer.write_chunk(data).unwrap();
        let path = writer.commit(&digest, data.len() as u64).unwrap();

        assert_eq!(path, cache.layer_path(&digest));
        assert_eq!(cache.lookup(&digest).unwrap(), Some(path));
    }

    #[test]
    fn lookup_missing_is_none() {
        let temp = tempdir().unwrap();
        let cache = LayerCache::new(temp.path()).unwrap();
        assert_eq!(cache.lookup(&digest_of(b"nothing")).unwrap(), None);
    }

    #[test]
    fn lookup_rejects_corrupt_file() {
        let temp = tempdir().unwrap();
        let cache = LayerCache::new(temp.path()).unwrap();
        let digest = digest_of(b"expected contents");

        std::fs::write(cache.layer_path(&digest), b"tampered").unwrap();
        assert_eq!(cache.lookup(&digest).unwrap(), None);
    }

    #[test]
    fn commit_rejects_size_mismatch() {
        let temp = tempdir().unwrap();
        let cache = LayerCache::new(temp.path()).unwrap();
        let data = b"short";
        let digest = digest_of(data);

        let mut writer = cache.writer(&digest).unwrap();
        writer.write_chunk(data).unwrap();
        let err = writer.commit(&digest, 999).unwrap_err();

        assert!(matches!(err, StoutError::SizeMismatch { .. }));
        assert!(!cache.layer_path(&digest).exists());
    }

    #[test]
    fn commit_rejects_digest_mismatch() {
        let temp = tempdir().unwrap();
        let cache = LayerCache::new(temp.path()).unwrap();
        let claimed = digest_of(b"what the descriptor promised");
        let data = b"what the registry sent";

        let mut writer = cache.writer(&claimed).unwrap();
        writer.write_chunk(data).unwrap();
        let err = writer.commit(&claimed, data.len() as u64).unwrap_err();

        assert!(matches!(err, StoutError::DigestMismatch { .. }));
        assert!(!cache.layer_path(&claimed).exists());
    }

    #[test]
    fn partial_never_visible_as_entry() {
        let temp = tempdir().unwrap();
        let cache = LayerCache::new(temp.path()).unwrap();
        let data = b"streaming";
        let digest = digest_of(data);

        let mut writer = cache.writer(&digest).unwrap();
        writer.write_chunk(data).unwrap();
        // Not committed yet: no lookup hit.
        assert_eq!(cache.lookup(&digest).unwrap(), None);
        writer.commit(&digest, data.len() as u64).unwrap();
        assert!(cache.lookup(&digest).unwrap().is_some());
    }
}
