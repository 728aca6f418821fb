//! # stout
//!
//! A minimal container runtime. Given a short image reference and a
//! command, Stout pulls the image from an OCI/Docker-compatible registry,
//! assembles its layers into a scratch root filesystem, and executes the
//! command chrooted into it under fresh UTS and PID namespaces.

#![warn(missing_docs)]

pub mod cli;
pub mod filesystem;
pub mod isolate;

pub use cli::Cli;
pub use isolate::{NamespaceConfig, Sandbox};
