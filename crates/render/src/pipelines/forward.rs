use super::{draw_with_material, meshes_with_blend};
use crate::RenderError;
use crate::context::RenderContext;
use crate::pipeline::RenderPipeline;
use crate::pipelines::DeferredPipeline;
use kiln_gpu::{Framebuffer, TargetAttachment};
use kiln_scene::{BlendMode, SceneContext};

/// Draws transparent materials over the lit image, depth-tested against the
/// g-buffer.
#[derive(Default)]
pub struct ForwardPipeline {
    target: Option<Framebuffer>,
    drawn: usize,
}

impl ForwardPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drawn(&self) -> usize {
        self.drawn
    }
}

impl RenderPipeline for ForwardPipeline {
    fn name(&self) -> &str {
        "forward"
    }

    fn init(&mut self, _ctx: &mut RenderContext) -> Result<(), RenderError> {
        Ok(())
    }

    fn after_init(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        let color = ctx.target(DeferredPipeline::LIT)?;
        let depth = ctx.target(DeferredPipeline::DEPTH)?;
        let gpu = ctx.gpu_mut();
        if let Some(old) = self.target.take() {
            old.free(gpu);
        }
        self.target = Some(Framebuffer::with_attachments(
            gpu,
            "forward",
            &[TargetAttachment::Color(color), TargetAttachment::Depth(depth)],
        )?);
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext, scene: &SceneContext) -> Result<(), RenderError> {
        let meshes = meshes_with_blend(scene, BlendMode::Transparent);
        self.drawn = 0;
        if meshes.is_empty() {
            return Ok(());
        }
        let view_proj = ctx.view_projection();
        let Some(target) = &self.target else {
            return Err(RenderError::NotInitialized);
        };
        let gpu = ctx.gpu_mut();
        target.bind(gpu);
        for mesh in meshes {
            if draw_with_material(gpu, scene, mesh, view_proj)? {
                self.drawn += 1;
            }
        }
        Ok(())
    }

    fn dispose(&mut self, ctx: &mut RenderContext) {
        if let Some(target) = self.target.take() {
            target.free(ctx.gpu_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererConfig;
    use crate::shaders;
    use kiln_gpu::{GpuContext, HeadlessBackend, HeadlessStats};
    use std::sync::Arc;

    fn ctx() -> (RenderContext, HeadlessStats) {
        let backend = HeadlessBackend::new();
        let stats = backend.stats();
        let gpu = GpuContext::new(Box::new(backend), Arc::new(shaders::builtin_assets()));
        (RenderContext::new(gpu, &RendererConfig::default()), stats)
    }

    #[test]
    fn wiring_needs_the_deferred_targets() {
        let (mut ctx, _) = ctx();
        let mut forward = ForwardPipeline::new();
        forward.init(&mut ctx).unwrap();
        assert!(matches!(forward.after_init(&mut ctx), Err(RenderError::MissingTarget(name)) if name == "deferred.lit"));
    }

    #[test]
    fn rewiring_replaces_the_framebuffer() {
        let (mut ctx, stats) = ctx();
        let mut deferred = DeferredPipeline::new();
        deferred.init(&mut ctx).unwrap();
        let mut forward = ForwardPipeline::new();
        forward.after_init(&mut ctx).unwrap();
        let live = stats.live(kiln_gpu::ObjectKind::Framebuffer);

        ctx.set_screen_size(100, 100);
        deferred.on_screen_resize(&mut ctx, 100, 100).unwrap();
        forward.after_init(&mut ctx).unwrap();
        assert_eq!(stats.live(kiln_gpu::ObjectKind::Framebuffer), live);
        assert_eq!(forward.target.as_ref().unwrap().size(), (100, 100));

        forward.dispose(&mut ctx);
        deferred.dispose(&mut ctx);
        assert_eq!(stats.live(kiln_gpu::ObjectKind::Framebuffer), 0);
    }
}
