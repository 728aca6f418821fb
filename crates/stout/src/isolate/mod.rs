//! Process isolation.
//!
//! Builds a per-invocation scratch directory, assembles the image rootfs
//! into it, and runs the user command chrooted there under fresh UTS and
//! PID namespaces. chroot is used instead of pivot_root; no mounts are
//! performed, so /proc inside the container is not populated.

#![allow(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use stout_common::paths::SCRATCH_PREFIX;
use stout_common::{StoutError, StoutResult};
use tempfile::TempDir;

use crate::filesystem;

/// Namespaces to create for the child process.
#[derive(Debug, Clone, Copy)]
pub struct NamespaceConfig {
    /// New UTS namespace (hostname view).
    pub uts: bool,
    /// New PID namespace (process-id view).
    pub pid: bool,
}

impl NamespaceConfig {
    /// The namespaces a `run` invocation uses.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            uts: true,
            pid: true,
        }
    }

    /// Convert to rustix unshare flags.
    #[must_use]
    pub fn to_unshare_flags(&self) -> rustix::thread::UnshareFlags {
        use rustix::thread::UnshareFlags;

        let mut flags = UnshareFlags::empty();
        if self.uts {
            flags |= UnshareFlags::NEWUTS;
        }
        if self.pid {
            flags |= UnshareFlags::NEWPID;
        }
        flags
    }
}

/// A per-invocation container sandbox.
///
/// Owns the scratch directory; dropping the sandbox removes it, so cleanup
/// fires on every exit path including errors.
pub struct Sandbox {
    scratch: TempDir,
}

impl Sandbox {
    /// Create the scratch directory under the system temp root.
    pub fn create() -> StoutResult<Self> {
        let scratch = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir()?;
        tracing::debug!(path = %scratch.path().display(), "Created scratch directory");
        Ok(Self { scratch })
    }

    /// The scratch directory that becomes the container root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.scratch.path()
    }

    /// Copy a helper binary into `usr/local/bin/`, preserving its mode.
    pub fn stage_helper(&self, helper: &Path) -> StoutResult<()> {
        let name = helper
            .file_name()
            .ok_or_else(|| StoutError::IsolationFailed {
                message: format!("helper path {} has no file name", helper.display()),
            })?;

        let bin_dir = self.path().join("usr").join("local").join("bin");
        std::fs::create_dir_all(&bin_dir)?;
        std::fs::copy(helper, bin_dir.join(name))?;

        tracing::debug!(helper = %helper.display(), "Staged helper binary");
        Ok(())
    }

    /// Assemble the image layers into the scratch directory.
    pub fn assemble(&self, layers: &[PathBuf]) -> StoutResult<()> {
        filesystem::assemble_rootfs(self.path(), layers)?;
        filesystem::prepare_dev(self.path())
    }

    /// Run the command inside the sandbox and return its exit code.
    ///
    /// The child inherits stdio and the environment. Before exec it
    /// unshares the configured namespaces, chroots into the scratch
    /// directory and changes directory to the new root.
    pub fn exec(
        &self,
        command: &str,
        args: &[String],
        namespaces: NamespaceConfig,
    ) -> StoutResult<i32> {
        let flags = namespaces.to_unshare_flags();
        let root = self.path().to_path_buf();

        let mut child = Command::new(command);
        child
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // Runs in the forked child, before exec.
        unsafe {
            use std::os::unix::process::CommandExt;
            child.pre_exec(move || {
                unsafe { rustix::thread::unshare_unsafe(flags) }?;
                rustix::process::chroot(&root)?;
                rustix::process::chdir("/")?;
                Ok(())
            });
        }

        tracing::info!(command, ?args, "Starting container process");

        let status = child
            .status()
            .map_err(|e| StoutError::IsolationFailed {
                message: format!("failed to execute {command:?}: {e}"),
            })?;

        Ok(exit_code(status))
    }
}

/// Map a child's wait status to the runtime's exit code.
///
/// A normal exit propagates verbatim; death by signal or any other
/// abnormal termination maps to 1.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn namespace_flags() {
        use rustix::thread::UnshareFlags;

        let flags = NamespaceConfig::standard().to_unshare_flags();
        assert!(flags.contains(UnshareFlags::NEWUTS));
        assert!(flags.contains(UnshareFlags::NEWPID));

        let none = NamespaceConfig {
            uts: false,
            pid: false,
        }
        .to_unshare_flags();
        assert!(none.is_empty());
    }

    #[test]
    fn exit_code_propagates_normal_exit() {
        // Raw wait status: exit code in the high byte.
        assert_eq!(exit_code(ExitStatus::from_raw(7 << 8)), 7);
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
    }

    #[test]
    fn exit_code_maps_signal_to_one() {
        // Raw wait status: termination by SIGKILL.
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 1);
    }

    #[test]
    fn scratch_directory_is_unique_and_cleaned() {
        let first = Sandbox::create().unwrap();
        let second = Sandbox::create().unwrap();
        assert_ne!(first.path(), second.path());

        let path = first.path().to_path_buf();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(SCRATCH_PREFIX));
        drop(first);
        assert!(!path.exists());
    }

    #[test]
    fn stage_helper_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let helper = temp.path().join("helper-bin");
        std::fs::write(&helper, b"#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();

        let sandbox = Sandbox::create().unwrap();
        sandbox.stage_helper(&helper).unwrap();

        let staged = sandbox.path().join("usr/local/bin/helper-bin");
        assert!(staged.exists());
        let mode = staged.metadata().unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }
}
