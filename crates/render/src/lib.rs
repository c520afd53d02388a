//! Render context, staged pipeline orchestration and the engine driver.
//!
//! A [`Renderer`] owns the [`RenderContext`] and an ordered list of
//! [`RenderPipeline`]s. Pipelines are set up in lockstep (BeforeInit for all,
//! then Init for all, then AfterInit for all) so that targets published during
//! Init can be looked up by name during AfterInit. Each frame then runs the
//! scene's synchronization point, followed by InitRender and Render for every
//! pipeline in registration order.
//!
//! # Invariants
//! - No pipeline renders before every pipeline has completed AfterInit.
//! - Pipelines are added only before initialization; disposal runs in
//!   reverse registration order, at most once.
//! - Deferred scene deallocations are finalized only inside `render_frame`,
//!   on the thread that owns the GPU context.
//! - A resize re-runs AfterInit on every pipeline so cross-pipeline wiring
//!   follows replaced targets.

mod camera;
mod config;
mod context;
mod engine;
mod error;
mod pipeline;
pub mod pipelines;
mod renderer;
pub mod shaders;

pub use camera::Camera;
pub use config::{RendererConfig, ShadowConfig};
pub use context::RenderContext;
pub use engine::{Engine, RunSummary};
pub use error::RenderError;
pub use pipeline::{PipelineOutput, PipelineStage, RenderPipeline};
pub use pipelines::{DeferredPipeline, ForwardPipeline, ScreenPipeline, ShadowPipeline};
pub use renderer::{FrameReport, Renderer};

pub fn crate_info() -> &'static str {
    "kiln-render v0.1.0"
}
