//! keyshelf core - shared functionality for the keyshelf tool
//!
//! Holds the standard filesystem locations, the user configuration file,
//! and the atomic file writer used by both the metadata index and the
//! encrypted vault.

pub mod config;
pub mod fs;
pub mod paths;

pub use config::{BackendKind, Config};
pub use paths::Paths;
