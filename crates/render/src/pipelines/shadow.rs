use crate::RenderError;
use crate::context::RenderContext;
use crate::pipeline::RenderPipeline;
use crate::shaders;
use glam::{Mat4, Vec4};
use kiln_common::ObjectId;
use kiln_gpu::{Framebuffer, Shader, TargetAttachment, TextureDesc, TextureFormat, TextureId};
use kiln_scene::{Capabilities, LightComponent, LightKind, MeshComponent, SceneContext};

/// Renders depth from every shadow-casting light of one kind into that
/// kind's layer of a shared array texture, published as `shadow.<kind>`.
pub struct ShadowPipeline {
    kind: LightKind,
    name: String,
    layers: u32,
    shader: Shader,
    texture: Option<TextureId>,
    framebuffers: Vec<Framebuffer>,
    casters: Vec<(u32, Mat4)>,
}

impl ShadowPipeline {
    pub fn new(kind: LightKind) -> Self {
        Self {
            kind,
            name: Self::target_name(kind),
            layers: 0,
            shader: Shader::new(shaders::shadow_depth()),
            texture: None,
            framebuffers: Vec::new(),
            casters: Vec::new(),
        }
    }

    /// Published name of the shadow-map array for `kind`.
    pub fn target_name(kind: LightKind) -> String {
        format!("shadow.{}", kind.as_str())
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }
}

impl RenderPipeline for ShadowPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_init(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        self.layers = ctx.shadow_slots().capacity(self.kind) as u32;
        if self.layers == 0 {
            tracing::warn!(kind = self.kind.as_str(), "no shadow layers configured; pipeline idle");
        }
        Ok(())
    }

    fn init(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        if self.layers == 0 {
            return Ok(());
        }
        let size = ctx.shadow_resolution();
        let gpu = ctx.gpu_mut();
        self.shader.compile(gpu)?;
        let texture = gpu.create_texture(TextureDesc::new_array(
            self.name.clone(),
            size,
            size,
            self.layers,
            TextureFormat::Depth32F,
        ));
        for layer in 0..self.layers {
            let label = format!("{}[{layer}]", self.name);
            match Framebuffer::with_attachments(gpu, &label, &[TargetAttachment::DepthLayer(texture, layer)]) {
                Ok(framebuffer) => self.framebuffers.push(framebuffer),
                Err(err) => {
                    for framebuffer in self.framebuffers.drain(..) {
                        framebuffer.free(gpu);
                    }
                    gpu.release_texture(texture);
                    return Err(err.into());
                }
            }
        }
        self.texture = Some(texture);
        ctx.publish(self.name.clone(), texture);
        Ok(())
    }

    fn init_render(&mut self, _ctx: &mut RenderContext, scene: &SceneContext) -> Result<(), RenderError> {
        self.casters.clear();
        for (id, object) in scene.iter_capable(Capabilities::LIGHT | Capabilities::SHADOW_CASTER) {
            let Some(light) = object.as_any().downcast_ref::<LightComponent>() else {
                continue;
            };
            if light.kind() != self.kind {
                continue;
            }
            if let Some(layer) = light.shadow_layer().filter(|l| *l < self.layers) {
                let position = scene.world_matrix(id).transform_point3(glam::Vec3::ZERO);
                self.casters.push((layer, light.view_proj(position)));
            }
        }
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext, scene: &SceneContext) -> Result<(), RenderError> {
        if self.casters.is_empty() {
            return Ok(());
        }
        let meshes: Vec<ObjectId> = scene
            .iter_capable(Capabilities::RENDERABLE | Capabilities::SHADOW_CASTER)
            .filter(|(_, object)| object.as_any().is::<MeshComponent>())
            .map(|(id, _)| id)
            .collect();

        let gpu = ctx.gpu_mut();
        for (layer, light_view_proj) in &self.casters {
            let framebuffer = &self.framebuffers[*layer as usize];
            framebuffer.bind_and_clear(gpu, Vec4::ONE);
            self.shader.set_uniform("u_light_view_proj", *light_view_proj);
            for id in &meshes {
                if let Some(mesh) = scene.get_as::<MeshComponent>(*id) {
                    self.shader.set_uniform("u_model", scene.world_matrix(*id));
                    self.shader.bind(gpu)?;
                    mesh.draw(gpu)?;
                }
            }
        }
        tracing::trace!(kind = self.kind.as_str(), lights = self.casters.len(), meshes = meshes.len(), "shadow maps rendered");
        Ok(())
    }

    fn dispose(&mut self, ctx: &mut RenderContext) {
        if let Some(texture) = self.texture.take() {
            ctx.withdraw(&self.name);
            let gpu = ctx.gpu_mut();
            for framebuffer in self.framebuffers.drain(..) {
                framebuffer.free(gpu);
            }
            gpu.release_texture(texture);
        }
        self.shader.release(ctx.gpu_mut());
    }
}
