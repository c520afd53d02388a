//! GPU resource core.
//!
//! Everything the render thread needs to create, share and destroy GPU
//! objects: the [`GraphicsBackend`] seam, content-addressed caches for vertex
//! arrays and shader programs, the texture registry and the [`GpuContext`]
//! that ties them together and skips redundant state changes.
//!
//! # Invariants
//! - Two requests with the same content key resolve to the same physical object.
//! - A cached object is deleted only when its last use is released.
//! - A texture is deleted only by a sweep, never at the point it is orphaned.
//! - A failed shader reload never replaces a working program.

mod backend;
mod context;
mod debug;
mod error;
mod framebuffer;
mod hash;
mod headless;
pub mod preprocess;
mod shader;
mod shader_cache;
mod texture;
mod vertex;
mod vertex_array;

pub use backend::{
    ActiveUniform, Attachment, BufferHandle, BufferKind, FramebufferHandle, GraphicsBackend, ObjectKind,
    ProgramHandle, ShaderStage, StageHandle, TextureDesc, TextureFormat, TextureHandle, Topology, UniformLocation,
    UniformValue, VertexArrayHandle,
};
pub use context::{GpuContext, GpuStats, ReloadReport};
pub use debug::DebugLabels;
pub use error::GpuError;
pub use framebuffer::{AttachmentSpec, Framebuffer, TargetAttachment};
pub use hash::ContentKey;
pub use headless::{BackendCall, HeadlessBackend, HeadlessStats};
pub use shader::{CompiledProgram, Shader, ShaderDesc};
pub use shader_cache::ShaderCache;
pub use texture::{TextureId, TextureRecord, TextureRegistry};
pub use vertex::{
    IndexData, MeshVertex, ScalarType, ScreenVertex, Vertex, VertexAttribute, VertexData, VertexLayout, cube,
    fullscreen_quad,
};
pub use vertex_array::{VertexArray, VertexArrayBinding, VertexArrayCache};

pub fn crate_info() -> &'static str {
    "kiln-gpu v0.1.0"
}
