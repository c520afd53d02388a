use crate::RenderError;
use crate::context::RenderContext;
use crate::pipeline::RenderPipeline;
use crate::shaders;
use kiln_gpu::{Shader, TextureId, VertexArray, fullscreen_quad};
use kiln_scene::SceneContext;

/// Composites a published target onto the default framebuffer.
pub struct ScreenPipeline {
    source_name: String,
    source: Option<TextureId>,
    exposure: f32,
    shader: Shader,
    quad: VertexArray,
}

impl ScreenPipeline {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source_name: source.into(),
            source: None,
            exposure: 1.0,
            shader: Shader::new(shaders::screen_composite()),
            quad: VertexArray::new("screen.quad"),
        }
    }

    pub fn with_exposure(mut self, exposure: f32) -> Self {
        self.exposure = exposure;
        self
    }
}

impl RenderPipeline for ScreenPipeline {
    fn name(&self) -> &str {
        "screen"
    }

    fn init(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        let gpu = ctx.gpu_mut();
        self.shader.compile(gpu)?;
        self.quad.set_data(gpu, &fullscreen_quad()?, None);
        Ok(())
    }

    fn after_init(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        self.source = Some(ctx.target(&self.source_name)?);
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext, _scene: &SceneContext) -> Result<(), RenderError> {
        let source = self.source.ok_or(RenderError::NotInitialized)?;
        let (width, height) = ctx.screen_size();
        let background = ctx.background();
        let gpu = ctx.gpu_mut();
        gpu.bind_framebuffer(None);
        gpu.set_viewport(width, height);
        gpu.clear(background, true);
        gpu.bind_texture(0, source)?;
        self.shader.set_uniform("u_source", 0);
        self.shader.set_uniform("u_exposure", self.exposure);
        self.shader.bind(gpu)?;
        self.quad.draw(gpu)?;
        Ok(())
    }

    fn dispose(&mut self, ctx: &mut RenderContext) {
        let gpu = ctx.gpu_mut();
        self.quad.free(gpu);
        self.shader.release(gpu);
        self.source = None;
    }
}
