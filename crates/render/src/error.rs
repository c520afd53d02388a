use crate::pipeline::PipelineStage;
use kiln_common::SlotError;
use kiln_gpu::GpuError;
use kiln_scene::SceneError;

/// Errors from the renderer and the engine driver.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid renderer config: {0}")]
    Config(#[from] serde_json::Error),
    #[error("render target '{0}' has not been published")]
    MissingTarget(String),
    #[error("renderer has already been initialized")]
    AlreadyInitialized,
    #[error("renderer is not initialized")]
    NotInitialized,
    #[error("pipeline '{pipeline}' failed in {stage}: {source}")]
    Stage {
        pipeline: String,
        stage: PipelineStage,
        #[source]
        source: Box<RenderError>,
    },
    #[error("update thread panicked")]
    UpdateThreadPanicked,
}
