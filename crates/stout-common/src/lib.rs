//! # stout-common
//!
//! Shared utilities and types for the Stout container runtime.
//!
//! This crate provides functionality used across all Stout crates:
//! - Common error types
//! - Standard filesystem paths

#![warn(missing_docs)]

pub mod error;
pub mod paths;

pub use error::{StoutError, StoutResult};
pub use paths::StoutPaths;
