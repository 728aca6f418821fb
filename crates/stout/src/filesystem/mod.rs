//! Root filesystem assembly.
//!
//! Composes an image's ordered layers into a scratch directory by applying
//! each gzip-compressed tar stream in manifest order, then prepares the
//! minimal `/dev` entries the child process expects.

mod dev;
mod extract;

pub use dev::prepare_dev;
pub use extract::assemble_rootfs;
