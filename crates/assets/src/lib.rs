//! Asset resolution: maps logical sub-paths to resource paths.
//!
//! The engine core never opens scene data through this crate; it resolves
//! shader sources and texture paths only. Derived assets (a source file
//! processed for a variant key) are materialized on demand by registered
//! generators into a content-addressed cache directory.
//!
//! # Invariants
//! - A derived asset path depends only on the sub-path and variant key.
//! - Generators run only when the derived file is missing or older than its source.

mod fs;
mod memory;

use std::path::PathBuf;

pub use fs::{FsAssets, Generator};
pub use memory::MemoryAssets;

/// Errors from asset resolution.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("no generator registered for variant '{variant}' of {sub_path}")]
    NoGenerator { sub_path: String, variant: String },
    #[error("generator for variant '{variant}' of {sub_path} failed: {reason}")]
    GeneratorFailed {
        sub_path: String,
        variant: String,
        reason: String,
    },
}

/// Resolves logical asset sub-paths.
pub trait AssetResolver: Send + Sync {
    /// Absolute path of `sub_path`, or of its derived `variant` (generated on
    /// demand).
    fn resolve(&self, sub_path: &str, variant: Option<&str>) -> Result<PathBuf, AssetError>;

    /// Load a text asset such as a shader source.
    fn read_to_string(&self, sub_path: &str) -> Result<String, AssetError> {
        let path = self.resolve(sub_path, None)?;
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Lowercase hex of the first `len` bytes of a digest.
pub(crate) fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes.iter().take(len).map(|b| format!("{b:02x}")).collect()
}

pub fn crate_info() -> &'static str {
    "kiln-assets v0.1.0"
}
