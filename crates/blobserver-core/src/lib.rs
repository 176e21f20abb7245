//! blobserver-core: Core types for the blobserver cache
//!
//! This crate provides the fundamental types shared by the blobserver crates:
//! - Content identifiers and origin registry entries
//! - Daemon configuration
//! - Error handling

pub mod blob;
pub mod config;
pub mod error;

pub use blob::*;
pub use config::*;
pub use error::*;
