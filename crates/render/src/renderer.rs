use crate::RenderError;
use crate::config::RendererConfig;
use crate::context::RenderContext;
use crate::pipeline::{PipelineOutput, PipelineStage, RenderPipeline};
use crate::pipelines::{DeferredPipeline, ForwardPipeline, ScreenPipeline, ShadowPipeline};
use kiln_gpu::GpuContext;
use kiln_scene::{LightKind, SceneContext, TaskQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Registering,
    Ready,
    Disposed,
}

/// What one render frame did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub render_tasks: usize,
    pub finalized: usize,
    pub textures_swept: usize,
    pub pipelines: usize,
}

/// Owns the render context and the registered pipelines and drives them
/// through their stages.
pub struct Renderer {
    ctx: RenderContext,
    pipelines: Vec<Box<dyn RenderPipeline>>,
    primary: Option<usize>,
    state: State,
    render_tasks: TaskQueue<RenderContext>,
    config: RendererConfig,
    frame: u64,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("pipelines", &self.pipeline_names())
            .field("state", &self.state)
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    pub fn new(gpu: GpuContext, config: RendererConfig) -> Self {
        Self {
            ctx: RenderContext::new(gpu, &config),
            pipelines: Vec::new(),
            primary: None,
            state: State::Registering,
            render_tasks: TaskQueue::new(),
            config,
            frame: 0,
        }
    }

    /// Shadow pipelines for every light kind with layers, then deferred
    /// (primary), forward and screen.
    pub fn register_standard(&mut self) -> Result<(), RenderError> {
        for kind in [LightKind::Directional, LightKind::Point] {
            if self.ctx.shadow_slots().capacity(kind) > 0 {
                self.register(ShadowPipeline::new(kind))?;
            }
        }
        self.register(DeferredPipeline::new())?;
        self.register(ForwardPipeline::new())?;
        self.register(ScreenPipeline::new(DeferredPipeline::LIT))?;
        self.set_primary("deferred");
        Ok(())
    }

    /// Append a pipeline. Registration closes once the renderer is
    /// initialized.
    pub fn register(&mut self, pipeline: impl RenderPipeline + 'static) -> Result<usize, RenderError> {
        if self.state != State::Registering {
            return Err(RenderError::AlreadyInitialized);
        }
        tracing::debug!(pipeline = pipeline.name(), index = self.pipelines.len(), "pipeline registered");
        self.pipelines.push(Box::new(pipeline));
        Ok(self.pipelines.len() - 1)
    }

    /// Pick the pipeline answering output queries. Returns `false` for an
    /// unknown name.
    pub fn set_primary(&mut self, name: &str) -> bool {
        match self.pipelines.iter().position(|p| p.name() == name) {
            Some(index) => {
                self.primary = Some(index);
                true
            }
            None => false,
        }
    }

    pub fn primary_output(&self) -> Option<PipelineOutput> {
        self.primary.and_then(|i| self.pipelines[i].output())
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.name()).collect()
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RenderContext {
        &mut self.ctx
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn is_initialized(&self) -> bool {
        self.state == State::Ready
    }

    /// Queue handle for actions that must run on the render activity.
    pub fn render_tasks(&self) -> TaskQueue<RenderContext> {
        self.render_tasks.clone()
    }

    pub fn dispatch_render(&self, task: impl FnOnce(&mut RenderContext) + Send + 'static) {
        self.render_tasks.dispatch(task);
    }

    /// Run BeforeInit, Init and AfterInit across all pipelines, each stage
    /// finishing everywhere before the next begins. On failure the pipelines
    /// that completed Init are disposed and the renderer cannot be
    /// initialized again.
    pub fn initialize(&mut self) -> Result<(), RenderError> {
        if self.state != State::Registering {
            return Err(RenderError::AlreadyInitialized);
        }
        let _span = tracing::info_span!("renderer_init", pipelines = self.pipelines.len()).entered();
        if let Err((err, initialized)) = self.run_init_stages() {
            self.abort_init(initialized);
            return Err(err);
        }
        self.state = State::Ready;
        tracing::info!(pipelines = ?self.pipeline_names(), "renderer initialized");
        Ok(())
    }

    /// On error also returns how many pipelines had completed Init.
    fn run_init_stages(&mut self) -> Result<(), (RenderError, usize)> {
        let pipeline_count = self.pipelines.len();
        for stage in [PipelineStage::BeforeInit, PipelineStage::Init, PipelineStage::AfterInit] {
            for (index, pipeline) in self.pipelines.iter_mut().enumerate() {
                let _stage = tracing::debug_span!("stage", pipeline = pipeline.name(), %stage).entered();
                let result = match stage {
                    PipelineStage::BeforeInit => pipeline.before_init(&mut self.ctx),
                    PipelineStage::Init => pipeline.init(&mut self.ctx),
                    _ => pipeline.after_init(&mut self.ctx),
                };
                if let Err(err) = result {
                    let initialized = match stage {
                        PipelineStage::BeforeInit => 0,
                        PipelineStage::Init => index,
                        _ => pipeline_count,
                    };
                    return Err((stage_error(pipeline.name(), stage, err), initialized));
                }
            }
        }
        Ok(())
    }

    fn abort_init(&mut self, initialized: usize) {
        for pipeline in self.pipelines[..initialized].iter_mut().rev() {
            tracing::debug!(pipeline = pipeline.name(), "dispose after failed init");
            pipeline.dispose(&mut self.ctx);
        }
        self.ctx.gpu_mut().sweep_textures();
        self.state = State::Disposed;
    }

    /// One render frame: render tasks, the scene's synchronization point, the
    /// periodic texture sweep, InitRender then Render for each pipeline in
    /// registration order, then `on_world_rendered` for every scene object.
    pub fn render_frame(&mut self, scene: &mut SceneContext) -> Result<FrameReport, RenderError> {
        if self.state != State::Ready {
            return Err(RenderError::NotInitialized);
        }
        self.frame += 1;
        let _span = tracing::debug_span!("render_frame", frame = self.frame).entered();

        let tasks = self.render_tasks.clone();
        let render_tasks = tasks.run_all(&mut self.ctx);
        let sync = scene.sync(self.ctx.gpu_mut());
        let textures_swept = if self.config.sweep_due(self.frame) {
            self.ctx.gpu_mut().sweep_textures()
        } else {
            0
        };

        for pipeline in &mut self.pipelines {
            let name = pipeline.name().to_string();
            self.ctx.gpu_mut().push_debug_group("Render", &name);
            let result = pipeline
                .init_render(&mut self.ctx, scene)
                .map_err(|err| stage_error(&name, PipelineStage::InitRender, err))
                .and_then(|()| {
                    pipeline
                        .render(&mut self.ctx, scene)
                        .map_err(|err| stage_error(&name, PipelineStage::Render, err))
                });
            self.ctx.gpu_mut().pop_debug_group();
            result?;
        }

        scene.broadcast_world_rendered(self.ctx.gpu_mut());
        Ok(FrameReport {
            frame: self.frame,
            render_tasks,
            finalized: sync.finalized.len(),
            textures_swept,
            pipelines: self.pipelines.len(),
        })
    }

    /// Resize every pipeline, rewire them with a fresh AfterInit pass, then
    /// tell the scene.
    pub fn resize(&mut self, width: u32, height: u32, scene: &mut SceneContext) -> Result<(), RenderError> {
        let _span = tracing::info_span!("resize", width, height).entered();
        self.ctx.set_screen_size(width, height);
        let (width, height) = self.ctx.screen_size();
        if self.state == State::Ready {
            for pipeline in &mut self.pipelines {
                pipeline
                    .on_screen_resize(&mut self.ctx, width, height)
                    .map_err(|err| stage_error(pipeline.name(), PipelineStage::Resize, err))?;
            }
            for pipeline in &mut self.pipelines {
                pipeline
                    .after_init(&mut self.ctx)
                    .map_err(|err| stage_error(pipeline.name(), PipelineStage::AfterInit, err))?;
            }
        }
        scene.broadcast_resize(width, height);
        Ok(())
    }

    /// Dispose every pipeline in reverse registration order. Safe to call
    /// more than once.
    pub fn dispose(&mut self) {
        if self.state == State::Disposed {
            return;
        }
        let _span = tracing::info_span!("renderer_dispose").entered();
        if self.state == State::Ready {
            for pipeline in self.pipelines.iter_mut().rev() {
                tracing::debug!(pipeline = pipeline.name(), "dispose");
                pipeline.dispose(&mut self.ctx);
            }
        }
        let leftover = self.render_tasks.drain().len();
        if leftover > 0 {
            tracing::debug!(leftover, "dropping unrun render tasks");
        }
        self.state = State::Disposed;
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if self.state == State::Ready {
            tracing::warn!("renderer dropped without dispose; pipeline resources leaked");
        }
    }
}

fn stage_error(pipeline: &str, stage: PipelineStage, source: RenderError) -> RenderError {
    tracing::error!(pipeline, %stage, error = %source, "pipeline stage failed");
    RenderError::Stage {
        pipeline: pipeline.to_string(),
        stage,
        source: Box::new(source),
    }
}
