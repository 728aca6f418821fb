//! Layer extraction with whiteout semantics.

use std::fs::{self, File};
use std::io::BufReader;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use stout_common::{StoutError, StoutResult};
use tar::{Archive, EntryType};

/// Marker prefix for layer-over-layer deletions.
const WHITEOUT_PREFIX: &str = ".wh.";
/// Marker that clears the enclosing directory's lower-layer contents.
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Apply each layer's gzip tar stream to `root`, strictly in the given
/// order. Later layers shadow earlier ones; whiteout entries delete paths
/// assembled by earlier layers.
pub fn assemble_rootfs(root: &Path, layers: &[PathBuf]) -> StoutResult<()> {
    for layer in layers {
        tracing::debug!(layer = %layer.display(), "Applying layer");
        apply_layer(root, layer).map_err(|e| StoutError::AssemblyFailed {
            message: format!("layer {}: {e}", layer.display()),
        })?;
    }
    Ok(())
}

/// Apply one layer, entries in file order.
fn apply_layer(root: &Path, layer: &Path) -> StoutResult<()> {
    let file = File::open(layer)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel = entry.path()?.into_owned();

        let Some(target) = safe_join(root, &rel) else {
            tracing::warn!(entry = %rel.display(), "Skipping entry escaping the rootfs");
            continue;
        };

        if let Some(name) = rel.file_name().and_then(|n| n.to_str()) {
            if name == OPAQUE_WHITEOUT {
                if let Some(parent) = target.parent() {
                    clear_directory(parent)?;
                }
                continue;
            }
            if let Some(victim) = name.strip_prefix(WHITEOUT_PREFIX) {
                if let Some(parent) = target.parent() {
                    remove_existing(&parent.join(victim))?;
                }
                continue;
            }
        }

        match entry.header().entry_type() {
            EntryType::Directory => {
                // A lower layer may have left a file or symlink where this
                // layer wants a directory.
                if target.symlink_metadata().is_ok_and(|m| !m.is_dir()) {
                    remove_existing(&target)?;
                }
                if !target.is_dir() {
                    fs::DirBuilder::new()
                        .recursive(true)
                        .mode(0o755)
                        .create(&target)?;
                }
            }
            EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                // A lower layer may have put a symlink here; writing through
                // it would escape the entry's path.
                remove_symlink(&target)?;
                let mode = entry.header().mode().unwrap_or(0o644);
                let mut out = File::create(&target)?;
                std::io::copy(&mut entry, &mut out)?;
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
            }
            EntryType::Symlink => {
                let link =
                    entry
                        .link_name()?
                        .ok_or_else(|| StoutError::AssemblyFailed {
                            message: format!("symlink {} has no target", rel.display()),
                        })?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                remove_existing(&target)?;
                std::os::unix::fs::symlink(&link, &target)?;
            }
            other => {
                tracing::debug!(entry = %rel.display(), ?other, "Skipping unsupported entry type");
            }
        }
    }

    Ok(())
}

/// Join a tar entry path under `root`, rejecting anything that would land
/// outside it.
fn safe_join(root: &Path, rel: &Path) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// Remove a path of any kind, tolerating its absence.
fn remove_existing(path: &Path) -> StoutResult<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Remove `path` only if it is a symlink.
fn remove_symlink(path: &Path) -> StoutResult<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path)?,
        _ => {}
    }
    Ok(())
}

/// Remove everything inside `dir`, keeping the directory itself.
fn clear_directory(dir: &Path) -> StoutResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for child in fs::read_dir(dir)? {
        remove_existing(&child?.path())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_normal() {
        let joined = safe_join(Path::new("/scratch"), Path::new("usr/bin/sh")).unwrap();
        assert_eq!(joined, Path::new("/scratch/usr/bin/sh"));
    }

    #[test]
    fn safe_join_strips_curdir() {
        let joined = safe_join(Path::new("/scratch"), Path::new("./etc/./passwd")).unwrap();
        assert_eq!(joined, Path::new("/scratch/etc/passwd"));
    }

    #[test]
    fn safe_join_rejects_parent_traversal() {
        assert!(safe_join(Path::new("/scratch"), Path::new("../evil")).is_none());
        assert!(safe_join(Path::new("/scratch"), Path::new("a/../../evil")).is_none());
    }

    #[test]
    fn safe_join_rejects_absolute() {
        assert!(safe_join(Path::new("/scratch"), Path::new("/etc/passwd")).is_none());
    }

    #[test]
    fn remove_existing_tolerates_absence() {
        remove_existing(Path::new("/nonexistent/definitely/not/here")).unwrap();
    }
}
