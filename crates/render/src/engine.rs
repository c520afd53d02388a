use crate::RenderError;
use crate::context::RenderContext;
use crate::renderer::{FrameReport, Renderer};
use kiln_gpu::ReloadReport;
use kiln_scene::{FrameGate, FrameInfo, SceneContext, UpdateReport};
use parking_lot::Mutex;

/// Totals from a run of frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub finalized: usize,
    pub textures_swept: usize,
}

impl RunSummary {
    fn add(&mut self, report: &FrameReport) {
        self.frames += 1;
        self.finalized += report.finalized;
        self.textures_swept += report.textures_swept;
    }
}

/// Drives the update and render activities of one scene.
///
/// Each frame the scene is updated, then the renderer runs the
/// synchronization point and every pipeline. With [`run_threaded`] the two
/// activities live on separate threads and meet at a [`FrameGate`].
///
/// [`run_threaded`]: Engine::run_threaded
#[derive(Debug)]
pub struct Engine {
    renderer: Renderer,
    scene: SceneContext,
    frame: FrameInfo,
}

impl Engine {
    /// Takes an initialized renderer.
    pub fn new(renderer: Renderer, scene: SceneContext) -> Result<Self, RenderError> {
        if !renderer.is_initialized() {
            return Err(RenderError::NotInitialized);
        }
        Ok(Self {
            renderer,
            scene,
            frame: FrameInfo::default(),
        })
    }

    pub fn scene(&self) -> &SceneContext {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut SceneContext {
        &mut self.scene
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    /// The last completed update frame.
    pub fn frame(&self) -> FrameInfo {
        self.frame
    }

    pub fn dispatch_updater(&self, task: impl FnOnce(&mut SceneContext) + Send + 'static) {
        self.scene.dispatch_updater(task);
    }

    pub fn dispatch_render(&self, task: impl FnOnce(&mut RenderContext) + Send + 'static) {
        self.renderer.dispatch_render(task);
    }

    /// Ask the render activity to reload every shader at its next frame.
    pub fn request_shader_reload(&self) {
        self.renderer.dispatch_render(|ctx| {
            let ReloadReport { reloaded, failed } = ctx.gpu_mut().reload_shaders();
            tracing::debug!(reloaded, failed, "shader hot reload");
        });
    }

    /// Update then render one frame on the calling thread.
    pub fn run_frame(&mut self, delta: f32) -> Result<FrameReport, RenderError> {
        let frame = self.frame.advance(delta);
        let update: UpdateReport = self.scene.update_frame(&frame);
        tracing::trace!(frame = frame.frame, tasks = update.tasks, world_updates = update.world_updates, "update done");
        self.frame = frame;
        self.renderer.render_frame(&mut self.scene)
    }

    pub fn run(&mut self, frames: u64, delta: f32) -> Result<RunSummary, RenderError> {
        let _span = tracing::info_span!("run", frames).entered();
        let mut summary = RunSummary::default();
        for _ in 0..frames {
            let report = self.run_frame(delta)?;
            summary.add(&report);
        }
        Ok(summary)
    }

    /// Run `frames` frames with the update activity on a second thread. The
    /// update thread is at most one frame ahead of rendering; a render error
    /// closes the gate and stops both.
    pub fn run_threaded(&mut self, frames: u64, delta: f32) -> Result<RunSummary, RenderError> {
        let _span = tracing::info_span!("run_threaded", frames).entered();
        let gate = FrameGate::new();
        let scene = Mutex::new(std::mem::take(&mut self.scene));
        let start = self.frame;
        let renderer = &mut self.renderer;

        let (result, last_frame) = std::thread::scope(|s| {
            let updater = s.spawn(|| {
                let _guard = CloseOnUnwind(&gate);
                let mut frame = start;
                for _ in 0..frames {
                    if !gate.wait_for_render() {
                        break;
                    }
                    frame = frame.advance(delta);
                    scene.lock().update_frame(&frame);
                    gate.signal_update();
                }
                frame
            });

            let mut summary = RunSummary::default();
            let mut result = Ok(());
            for _ in 0..frames {
                if !gate.wait_for_update() {
                    break;
                }
                match renderer.render_frame(&mut scene.lock()) {
                    Ok(report) => summary.add(&report),
                    Err(err) => {
                        result = Err(err);
                        break;
                    }
                }
                gate.signal_rendered();
            }
            gate.close();

            let last_frame = updater.join().map_err(|_| RenderError::UpdateThreadPanicked);
            (result.map(|()| summary), last_frame)
        });

        self.scene = scene.into_inner();
        self.frame = last_frame?;
        result
    }

    /// Resize the renderer's targets and tell the scene.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.renderer.resize(width, height, &mut self.scene)
    }

    /// Finalize every scene object through the normal sweep, dispose the
    /// pipelines and release what is left on the GPU. Returns the number of
    /// scene objects finalized.
    pub fn shutdown(mut self) -> usize {
        let _span = tracing::info_span!("engine_shutdown").entered();
        let finalized = self.scene.shutdown(self.renderer.context_mut().gpu_mut());
        self.renderer.dispose();
        self.renderer.context_mut().gpu_mut().shutdown();
        tracing::info!(finalized, frames = self.frame.frame, "engine stopped");
        finalized
    }
}

/// Closes the gate if the update thread unwinds, so the render loop stops
/// waiting for a frame that will never come.
struct CloseOnUnwind<'a>(&'a FrameGate);

impl Drop for CloseOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!("update thread panicked");
            self.0.close();
        }
    }
}
