use crate::RenderError;
use crate::camera::Camera;
use crate::config::RendererConfig;
use glam::{Mat4, Vec4};
use kiln_gpu::{GpuContext, TextureId};
use kiln_scene::ShadowSlots;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a pipeline stage may touch: the GPU, global render state and
/// the render targets pipelines publish for each other.
#[derive(Debug)]
pub struct RenderContext {
    gpu: GpuContext,
    pub camera: Camera,
    background: Vec4,
    light_binding: u32,
    width: u32,
    height: u32,
    shadow_slots: Arc<ShadowSlots>,
    shadow_resolution: u32,
    targets: BTreeMap<String, TextureId>,
}

impl RenderContext {
    pub fn new(gpu: GpuContext, config: &RendererConfig) -> Self {
        Self {
            gpu,
            camera: Camera::default(),
            background: config.background(),
            light_binding: config.light_binding,
            width: config.width.max(1),
            height: config.height.max(1),
            shadow_slots: Arc::new(ShadowSlots::new(
                config.shadows.point_layers,
                config.shadows.directional_layers,
            )),
            shadow_resolution: config.shadows.resolution.max(1),
            targets: BTreeMap::new(),
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut GpuContext {
        &mut self.gpu
    }

    pub fn background(&self) -> Vec4 {
        self.background
    }

    pub fn light_binding(&self) -> u32 {
        self.light_binding
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub(crate) fn set_screen_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn view_projection(&self) -> Mat4 {
        self.camera.view_projection(self.aspect())
    }

    /// Per-kind shadow layer allocators. Lights claim layers from these.
    pub fn shadow_slots(&self) -> &Arc<ShadowSlots> {
        &self.shadow_slots
    }

    pub fn shadow_resolution(&self) -> u32 {
        self.shadow_resolution
    }

    /// Make `texture` available to other pipelines under `name`, replacing
    /// any earlier texture of that name.
    pub fn publish(&mut self, name: impl Into<String>, texture: TextureId) {
        let name = name.into();
        tracing::debug!(target_name = %name, ?texture, "render target published");
        self.targets.insert(name, texture);
    }

    pub fn withdraw(&mut self, name: &str) -> Option<TextureId> {
        self.targets.remove(name)
    }

    /// A published target that must exist.
    pub fn target(&self, name: &str) -> Result<TextureId, RenderError> {
        self.lookup(name).ok_or_else(|| RenderError::MissingTarget(name.to_string()))
    }

    /// A published target that is optional for the caller.
    pub fn lookup(&self, name: &str) -> Option<TextureId> {
        self.targets.get(name).copied()
    }

    pub fn targets(&self) -> impl Iterator<Item = (&str, TextureId)> {
        self.targets.iter().map(|(name, id)| (name.as_str(), *id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_assets::MemoryAssets;
    use kiln_gpu::{HeadlessBackend, TextureDesc, TextureFormat};
    use kiln_scene::LightKind;

    fn ctx() -> RenderContext {
        let gpu = GpuContext::new(Box::new(HeadlessBackend::new()), Arc::new(MemoryAssets::new()));
        RenderContext::new(gpu, &RendererConfig::default())
    }

    #[test]
    fn targets_are_published_and_replaced() {
        let mut ctx = ctx();
        assert!(matches!(ctx.target("lit"), Err(RenderError::MissingTarget(_))));
        let a = ctx.gpu_mut().create_texture(TextureDesc::new_2d("a", 2, 2, TextureFormat::Rgba8));
        let b = ctx.gpu_mut().create_texture(TextureDesc::new_2d("b", 2, 2, TextureFormat::Rgba8));
        ctx.publish("lit", a);
        assert_eq!(ctx.target("lit").unwrap(), a);
        ctx.publish("lit", b);
        assert_eq!(ctx.lookup("lit"), Some(b));
        assert_eq!(ctx.withdraw("lit"), Some(b));
        assert_eq!(ctx.targets().count(), 0);
    }

    #[test]
    fn shadow_slots_follow_config() {
        let ctx = ctx();
        let config = RendererConfig::default();
        assert_eq!(
            ctx.shadow_slots().capacity(LightKind::Point),
            config.shadows.point_layers as usize
        );
        assert_eq!(ctx.screen_size(), (config.width, config.height));
    }

    #[test]
    fn zero_sized_screen_is_clamped() {
        let mut ctx = ctx();
        ctx.set_screen_size(0, 0);
        assert_eq!(ctx.screen_size(), (1, 1));
        assert!(ctx.aspect().is_finite());
    }
}
