use crate::RenderError;
use crate::context::RenderContext;
use kiln_gpu::TextureId;
use kiln_scene::SceneContext;
use std::fmt;

/// The stages a pipeline passes through. Setup stages run in lockstep: every
/// pipeline finishes one before any pipeline starts the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineStage {
    BeforeInit,
    Init,
    AfterInit,
    InitRender,
    Render,
    Resize,
    Dispose,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeInit => "BeforeInit",
            Self::Init => "Init",
            Self::AfterInit => "AfterInit",
            Self::InitRender => "InitRender",
            Self::Render => "Render",
            Self::Resize => "Resize",
            Self::Dispose => "Dispose",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final images of a pipeline, for callers such as picking or screenshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOutput {
    pub color: Option<TextureId>,
    pub depth: Option<TextureId>,
}

/// One pass (or group of passes) of the frame.
///
/// `before_init` reserves shared resources, `init` creates the pipeline's own
/// targets and shaders and publishes the ones others need, `after_init` wires
/// targets published by other pipelines. `after_init` runs again after every
/// screen resize and must replace its earlier wiring.
pub trait RenderPipeline: Send {
    fn name(&self) -> &str;

    fn before_init(&mut self, _ctx: &mut RenderContext) -> Result<(), RenderError> {
        Ok(())
    }

    fn init(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError>;

    fn after_init(&mut self, _ctx: &mut RenderContext) -> Result<(), RenderError> {
        Ok(())
    }

    /// Per-frame preparation, before [`render`](Self::render).
    fn init_render(&mut self, _ctx: &mut RenderContext, _scene: &SceneContext) -> Result<(), RenderError> {
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext, scene: &SceneContext) -> Result<(), RenderError>;

    fn on_screen_resize(&mut self, _ctx: &mut RenderContext, _width: u32, _height: u32) -> Result<(), RenderError> {
        Ok(())
    }

    /// Release everything the pipeline created.
    fn dispose(&mut self, ctx: &mut RenderContext);

    fn output(&self) -> Option<PipelineOutput> {
        None
    }
}
