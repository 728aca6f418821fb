//! # stout-image
//!
//! Container image pulling for Stout.
//!
//! This crate provides:
//! - Image reference parsing
//! - Bearer-token registry authentication
//! - Manifest resolution with platform selection
//! - Concurrent, digest-verified layer fetching
//! - A content-addressed on-disk layer cache

#![warn(missing_docs)]

pub mod auth;
pub mod cache;
pub mod client;
pub mod digest;
pub mod endpoint;
pub mod manifest;
pub mod reference;

pub use auth::{AuthChallenge, AuthToken};
pub use cache::LayerCache;
pub use client::{LocalLayer, RegistryClient, TransportConfig};
pub use digest::Digest;
pub use endpoint::RegistryEndpoint;
pub use manifest::{Descriptor, Manifest, ManifestIndex};
pub use reference::ImageReference;
