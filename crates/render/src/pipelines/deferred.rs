use super::{draw_with_material, meshes_with_blend};
use crate::RenderError;
use crate::context::RenderContext;
use crate::pipeline::{PipelineOutput, RenderPipeline};
use crate::pipelines::ShadowPipeline;
use crate::shaders::{self, MAX_LIGHTS};
use glam::{Vec3, Vec4};
use kiln_gpu::{AttachmentSpec, Framebuffer, GpuContext, Shader, TextureFormat, TextureId, VertexArray, fullscreen_quad};
use kiln_scene::{BlendMode, Capabilities, LightComponent, LightKind, SceneContext};

struct FrameLight {
    color: Vec3,
    direction: Vec3,
    layer: i32,
}

/// G-buffer geometry pass for opaque materials followed by a full-screen
/// lighting pass into the lit target.
pub struct DeferredPipeline {
    gbuffer: Option<Framebuffer>,
    lit: Option<Framebuffer>,
    lighting: Shader,
    quad: VertexArray,
    shadow_directional: Option<TextureId>,
    lights: Vec<FrameLight>,
    drawn: usize,
}

impl Default for DeferredPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredPipeline {
    pub const ALBEDO: &'static str = "gbuffer.albedo";
    pub const NORMAL: &'static str = "gbuffer.normal";
    pub const DEPTH: &'static str = "gbuffer.depth";
    pub const LIT: &'static str = "deferred.lit";

    pub fn new() -> Self {
        Self {
            gbuffer: None,
            lit: None,
            lighting: Shader::new(shaders::deferred_lighting()),
            quad: VertexArray::new("deferred.quad"),
            shadow_directional: None,
            lights: Vec::new(),
            drawn: 0,
        }
    }

    /// Meshes drawn into the g-buffer last frame.
    pub fn drawn(&self) -> usize {
        self.drawn
    }

    fn build_targets(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        let (width, height) = ctx.screen_size();
        let gbuffer = Framebuffer::build(
            ctx.gpu_mut(),
            "gbuffer",
            width,
            height,
            &[
                AttachmentSpec::Color(TextureFormat::Rgba8),
                AttachmentSpec::Color(TextureFormat::Rgba16F),
                AttachmentSpec::Depth(TextureFormat::Depth24),
            ],
        )?;
        let lit = match Framebuffer::build(
            ctx.gpu_mut(),
            "deferred.lit",
            width,
            height,
            &[AttachmentSpec::Color(TextureFormat::Rgba16F)],
        ) {
            Ok(lit) => lit,
            Err(err) => {
                gbuffer.free(ctx.gpu_mut());
                return Err(err.into());
            }
        };

        for (name, texture) in [
            (Self::ALBEDO, gbuffer.color(0)),
            (Self::NORMAL, gbuffer.color(1)),
            (Self::DEPTH, gbuffer.depth()),
            (Self::LIT, lit.color(0)),
        ] {
            if let Some(texture) = texture {
                ctx.publish(name, texture);
            }
        }
        self.gbuffer = Some(gbuffer);
        self.lit = Some(lit);
        Ok(())
    }

    fn free_targets(&mut self, gpu: &mut GpuContext) {
        if let Some(gbuffer) = self.gbuffer.take() {
            gbuffer.free(gpu);
        }
        if let Some(lit) = self.lit.take() {
            lit.free(gpu);
        }
    }
}

impl RenderPipeline for DeferredPipeline {
    fn name(&self) -> &str {
        "deferred"
    }

    fn init(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        self.lighting.compile(ctx.gpu_mut())?;
        self.quad.set_data(ctx.gpu_mut(), &fullscreen_quad()?, None);
        self.build_targets(ctx)
    }

    fn after_init(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        self.shadow_directional = ctx.lookup(&ShadowPipeline::target_name(LightKind::Directional));
        Ok(())
    }

    fn init_render(&mut self, _ctx: &mut RenderContext, scene: &SceneContext) -> Result<(), RenderError> {
        self.lights.clear();
        for (id, object) in scene.iter_capable(Capabilities::LIGHT) {
            let Some(light) = object.as_any().downcast_ref::<LightComponent>() else {
                continue;
            };
            if self.lights.len() == MAX_LIGHTS {
                tracing::warn!(%id, max = MAX_LIGHTS, "light limit reached; extra lights ignored");
                break;
            }
            let direction = match light.kind() {
                LightKind::Directional => light.direction(),
                LightKind::Point => Vec3::NEG_Y,
            };
            self.lights.push(FrameLight {
                color: light.color() * light.intensity(),
                direction,
                layer: light.shadow_layer().map_or(-1, |l| l as i32),
            });
        }
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext, scene: &SceneContext) -> Result<(), RenderError> {
        let view_proj = ctx.view_projection();
        let background = ctx.background();
        let light_binding = ctx.light_binding();
        let (Some(gbuffer), Some(lit)) = (&self.gbuffer, &self.lit) else {
            return Err(RenderError::NotInitialized);
        };
        let gpu = ctx.gpu_mut();

        gpu.push_debug_group("Draw", "gbuffer");
        gbuffer.bind_and_clear(gpu, Vec4::ZERO);
        let mut drawn = 0;
        for mesh in meshes_with_blend(scene, BlendMode::Opaque) {
            if draw_with_material(gpu, scene, mesh, view_proj)? {
                drawn += 1;
            }
        }
        gpu.pop_debug_group();
        self.drawn = drawn;

        gpu.push_debug_group("Draw", "lighting");
        lit.bind_and_clear(gpu, background);
        let mut unit = 0;
        for (sampler, texture) in [
            ("u_albedo", gbuffer.color(0)),
            ("u_normal", gbuffer.color(1)),
            ("u_depth", gbuffer.depth()),
            ("u_shadow_directional", self.shadow_directional),
        ] {
            if let Some(texture) = texture {
                gpu.bind_texture(unit, texture)?;
                self.lighting.set_uniform(sampler, unit as i32);
                unit += 1;
            }
        }
        self.lighting.set_uniform("u_light_count", self.lights.len() as i32);
        for (i, light) in self.lights.iter().enumerate() {
            self.lighting.set_uniform(format!("u_light_color[{i}]"), light.color);
            self.lighting.set_uniform(format!("u_light_dir[{i}]"), light.direction);
            self.lighting.set_uniform(format!("u_light_layer[{i}]"), light.layer);
        }
        self.lighting.bind(gpu)?;
        self.lighting.bind_uniform_block(gpu, "Lights", light_binding)?;
        self.quad.draw(gpu)?;
        gpu.pop_debug_group();
        Ok(())
    }

    fn on_screen_resize(&mut self, ctx: &mut RenderContext, _width: u32, _height: u32) -> Result<(), RenderError> {
        self.free_targets(ctx.gpu_mut());
        self.build_targets(ctx)
    }

    fn dispose(&mut self, ctx: &mut RenderContext) {
        for name in [Self::ALBEDO, Self::NORMAL, Self::DEPTH, Self::LIT] {
            ctx.withdraw(name);
        }
        let gpu = ctx.gpu_mut();
        self.free_targets(gpu);
        self.quad.free(gpu);
        self.lighting.release(gpu);
    }

    fn output(&self) -> Option<PipelineOutput> {
        Some(PipelineOutput {
            color: self.lit.as_ref().and_then(|f| f.color(0)),
            depth: self.gbuffer.as_ref().and_then(Framebuffer::depth),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererConfig;
    use kiln_gpu::{BackendCall, HeadlessBackend, HeadlessStats, TextureDesc, cube};
    use kiln_scene::{Actor, Material, MeshComponent};
    use std::sync::Arc;

    fn ctx() -> (RenderContext, HeadlessStats) {
        let backend = HeadlessBackend::new();
        let stats = backend.stats();
        let gpu = GpuContext::new(Box::new(backend), Arc::new(shaders::builtin_assets()));
        (RenderContext::new(gpu, &RendererConfig::default()), stats)
    }

    fn ready(ctx: &mut RenderContext) -> DeferredPipeline {
        let mut pipeline = DeferredPipeline::new();
        pipeline.before_init(ctx).unwrap();
        pipeline.init(ctx).unwrap();
        pipeline.after_init(ctx).unwrap();
        pipeline
    }

    #[test]
    fn publishes_gbuffer_and_lit_targets() {
        let (mut ctx, _) = ctx();
        let mut pipeline = ready(&mut ctx);
        for name in [
            DeferredPipeline::ALBEDO,
            DeferredPipeline::NORMAL,
            DeferredPipeline::DEPTH,
            DeferredPipeline::LIT,
        ] {
            assert!(ctx.lookup(name).is_some(), "{name} missing");
        }
        let output = pipeline.output().unwrap();
        assert_eq!(output.depth, ctx.lookup(DeferredPipeline::DEPTH));
        assert_eq!(output.color, ctx.lookup(DeferredPipeline::LIT));

        pipeline.dispose(&mut ctx);
        assert_eq!(ctx.targets().count(), 0);
        assert_eq!(ctx.gpu_mut().sweep_textures(), 4);
        assert!(ctx.gpu().vertex_arrays().is_empty());
    }

    #[test]
    fn resize_replaces_targets() {
        let (mut ctx, _) = ctx();
        let mut pipeline = ready(&mut ctx);
        let before = ctx.target(DeferredPipeline::LIT).unwrap();
        ctx.set_screen_size(320, 200);
        pipeline.on_screen_resize(&mut ctx, 320, 200).unwrap();
        let after = ctx.target(DeferredPipeline::LIT).unwrap();
        assert_ne!(before, after);
        assert_eq!(ctx.gpu().textures().is_orphaned(before), Some(true));
        let desc = &ctx.gpu().textures().get(after).unwrap().desc;
        assert_eq!((desc.width, desc.height), (320, 200));
        pipeline.dispose(&mut ctx);
    }

    #[test]
    fn draws_only_opaque_meshes() {
        let (mut ctx, stats) = ctx();
        let mut pipeline = ready(&mut ctx);
        let mut scene = SceneContext::new();
        let albedo = ctx
            .gpu_mut()
            .create_texture(TextureDesc::new_2d("brick", 8, 8, TextureFormat::Rgba8));
        let opaque = Material::new(ctx.gpu_mut(), "brick", shaders::standard_material("brick"))
            .unwrap()
            .with_texture(ctx.gpu_mut(), "u_albedo", albedo)
            .unwrap();
        ctx.gpu_mut().release_texture(albedo);
        let opaque = scene.insert(opaque).unwrap();
        let glass = Material::new(ctx.gpu_mut(), "glass", shaders::transparent_material("glass"))
            .unwrap()
            .with_blend(BlendMode::Transparent);
        let glass = scene.insert(glass).unwrap();

        let (vertices, indices) = cube().unwrap();
        for material in [opaque, glass] {
            let actor = scene.spawn_actor(Actor::new("box"));
            scene
                .attach(actor, MeshComponent::new(ctx.gpu_mut(), "cube", &vertices, Some(&indices), material))
                .unwrap();
        }
        let sun = scene.spawn_actor(Actor::new("sun"));
        scene
            .attach(sun, LightComponent::directional(Vec3::NEG_Y, Vec3::ONE, 2.0))
            .unwrap();

        stats.clear_calls();
        pipeline.init_render(&mut ctx, &scene).unwrap();
        pipeline.render(&mut ctx, &scene).unwrap();
        assert_eq!(pipeline.drawn(), 1);
        assert_eq!(pipeline.lights.len(), 1);
        // one mesh plus the lighting quad
        assert_eq!(stats.count_calls(|c| matches!(c, BackendCall::Draw { .. })), 2);
        assert_eq!(
            stats.count_calls(|c| matches!(c, BackendCall::BindUniformBlock { binding, .. } if *binding == ctx.light_binding())),
            1
        );

        scene.shutdown(ctx.gpu_mut());
        pipeline.dispose(&mut ctx);
    }
}
