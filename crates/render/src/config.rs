use crate::RenderError;
use glam::Vec4;
use kiln_assets::AssetResolver;
use kiln_gpu::{GpuContext, GraphicsBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shadow-map array sizes, per light kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Layers available to point lights. 0 disables point shadows.
    pub point_layers: u32,
    pub directional_layers: u32,
    /// Edge length of one shadow-map layer in texels.
    pub resolution: u32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            point_layers: 4,
            directional_layers: 2,
            resolution: 1024,
        }
    }
}

/// Renderer and engine settings. Every field has a default, so a config file
/// only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    /// Emit debug groups and object labels.
    pub debug_labels: bool,
    pub shadows: ShadowConfig,
    /// Where shader compile and link failures are written.
    pub dump_dir: Option<PathBuf>,
    /// Frames between texture sweeps. 0 and 1 both sweep every frame.
    pub texture_sweep_interval: u64,
    /// RGBA clear colour of the screen.
    pub background: [f32; 4],
    /// Uniform-block binding point for light data.
    pub light_binding: u32,
    /// Run update and render on separate threads.
    pub threaded: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            debug_labels: false,
            shadows: ShadowConfig::default(),
            dump_dir: None,
            texture_sweep_interval: 60,
            background: [0.05, 0.05, 0.08, 1.0],
            light_binding: 1,
            threaded: false,
        }
    }
}

impl RendererConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(file)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RenderError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// A GPU context with the debug-label and dump settings applied.
    pub fn create_gpu(&self, backend: Box<dyn GraphicsBackend>, assets: Arc<dyn AssetResolver>) -> GpuContext {
        let gpu = GpuContext::new(backend, assets).with_debug(self.debug_labels);
        match &self.dump_dir {
            Some(dir) => gpu.with_dump_dir(dir.clone()),
            None => gpu,
        }
    }

    pub fn background(&self) -> Vec4 {
        Vec4::from_array(self.background)
    }

    pub fn sweep_due(&self, frame: u64) -> bool {
        self.texture_sweep_interval <= 1 || frame % self.texture_sweep_interval == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.json");
        std::fs::write(&path, r#"{ "width": 640, "shadows": { "point_layers": 1 } }"#).unwrap();

        let config = RendererConfig::load(&path).unwrap();
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 720);
        assert_eq!(config.shadows.point_layers, 1);
        assert_eq!(config.shadows.directional_layers, 2);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.json");
        let config = RendererConfig {
            debug_labels: true,
            dump_dir: Some(dir.path().join("dumps")),
            ..RendererConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(RendererConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.json");
        std::fs::write(&path, "{ width: ").unwrap();
        assert!(matches!(RendererConfig::load(&path), Err(RenderError::Config(_))));
    }

    #[test]
    fn gpu_picks_up_debug_labels() {
        let config = RendererConfig {
            debug_labels: true,
            ..RendererConfig::default()
        };
        let gpu = config.create_gpu(
            Box::new(kiln_gpu::HeadlessBackend::new()),
            Arc::new(kiln_assets::MemoryAssets::new()),
        );
        assert!(gpu.debug().enabled());
        let quiet = RendererConfig::default().create_gpu(
            Box::new(kiln_gpu::HeadlessBackend::new()),
            Arc::new(kiln_assets::MemoryAssets::new()),
        );
        assert!(!quiet.debug().enabled());
    }

    #[test]
    fn sweep_interval() {
        let config = RendererConfig {
            texture_sweep_interval: 3,
            ..RendererConfig::default()
        };
        assert!(config.sweep_due(3));
        assert!(!config.sweep_due(4));
        let every = RendererConfig {
            texture_sweep_interval: 0,
            ..RendererConfig::default()
        };
        assert!(every.sweep_due(7));
    }
}
