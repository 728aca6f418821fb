//! Minimal /dev preparation for the assembled rootfs.

use std::fs;
use std::path::Path;

use stout_common::StoutResult;

/// Ensure `<rootfs>/dev` exists and carries a `null` device node.
///
/// Creating the node requires CAP_MKNOD; permission denied is expected in
/// rootless mode and is not an error.
pub fn prepare_dev(rootfs: &Path) -> StoutResult<()> {
    let dev = rootfs.join("dev");
    fs::create_dir_all(&dev)?;

    let null = dev.join("null");
    if null.exists() {
        return Ok(());
    }

    use rustix::fs::{mknodat, FileType, Mode, CWD};

    let dev_num = rustix::fs::makedev(1, 3);
    match mknodat(
        CWD,
        &null,
        FileType::CharacterDevice,
        Mode::from_raw_mode(0o666),
        dev_num,
    ) {
        Ok(()) => {
            tracing::debug!(path = %null.display(), "Created /dev/null");
        }
        Err(e) => {
            if e.kind() != std::io::ErrorKind::PermissionDenied {
                return Err(std::io::Error::from(e).into());
            }
            tracing::debug!("Skipping /dev/null (no CAP_MKNOD)");
        }
    }

    Ok(())
}
