use crate::{AssetError, AssetResolver, hex_prefix};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Materializes a derived asset: called with the resolved source path and the
/// destination path inside the cache directory.
pub type Generator = Box<dyn Fn(&Path, &Path) -> Result<(), String> + Send + Sync>;

/// Filesystem-backed resolver.
///
/// Sub-paths are looked up in each search root in registration order. A
/// variant key maps to a generator; its output is cached under `cache_dir`
/// with a name derived from a SHA-256 of the sub-path and variant.
pub struct FsAssets {
    roots: Vec<PathBuf>,
    cache_dir: PathBuf,
    generators: HashMap<String, Generator>,
}

impl FsAssets {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            roots: Vec::new(),
            cache_dir: cache_dir.into(),
            generators: HashMap::new(),
        }
    }

    /// Add a search root. Earlier roots win.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    pub fn register_generator(
        &mut self,
        variant: impl Into<String>,
        generator: impl Fn(&Path, &Path) -> Result<(), String> + Send + Sync + 'static,
    ) {
        self.generators.insert(variant.into(), Box::new(generator));
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn find_source(&self, sub_path: &str) -> Result<PathBuf, AssetError> {
        let relative = sub_path.trim_start_matches('/');
        self.roots
            .iter()
            .map(|root| root.join(relative))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| AssetError::NotFound(sub_path.to_string()))
    }

    /// Cache location of a derived asset.
    pub fn derived_path(&self, sub_path: &str, variant: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(sub_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(variant.as_bytes());
        let digest = hasher.finalize();

        let file_name = Path::new(sub_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "asset".to_string());
        self.cache_dir
            .join(format!("{}-{variant}-{file_name}", hex_prefix(&digest, 8)))
    }

    fn materialize(&self, sub_path: &str, source: &Path, variant: &str) -> Result<PathBuf, AssetError> {
        let derived = self.derived_path(sub_path, variant);
        if !is_stale(source, &derived) {
            return Ok(derived);
        }

        let generator = self
            .generators
            .get(variant)
            .ok_or_else(|| AssetError::NoGenerator {
                sub_path: sub_path.to_string(),
                variant: variant.to_string(),
            })?;

        std::fs::create_dir_all(&self.cache_dir)?;
        generator(source, &derived).map_err(|reason| AssetError::GeneratorFailed {
            sub_path: sub_path.to_string(),
            variant: variant.to_string(),
            reason,
        })?;
        if !derived.is_file() {
            return Err(AssetError::GeneratorFailed {
                sub_path: sub_path.to_string(),
                variant: variant.to_string(),
                reason: format!("generator did not write {}", derived.display()),
            });
        }

        tracing::debug!(sub_path, variant, path = %derived.display(), "generated derived asset");
        Ok(derived)
    }
}

impl AssetResolver for FsAssets {
    fn resolve(&self, sub_path: &str, variant: Option<&str>) -> Result<PathBuf, AssetError> {
        let source = self.find_source(sub_path)?;
        match variant {
            None => Ok(source),
            Some(variant) => self.materialize(sub_path, &source, variant),
        }
    }
}

/// A derived file is stale when it is missing or older than its source.
fn is_stale(source: &Path, derived: &Path) -> bool {
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(source), modified(derived)) {
        (Some(src), Some(dst)) => dst < src,
        (_, None) => true,
        (None, Some(_)) => false,
    }
}
