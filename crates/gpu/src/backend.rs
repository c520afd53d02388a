use crate::vertex::VertexLayout;
use glam::{Mat4, Vec2, Vec3, Vec4};

macro_rules! gpu_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

gpu_handle!(
    /// Physical vertex or index buffer.
    BufferHandle,
    /// Physical vertex array object.
    VertexArrayHandle,
    TextureHandle,
    FramebufferHandle,
    /// Compiled shader stage object.
    StageHandle,
    /// Linked shader program.
    ProgramHandle,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Fragment,
}

impl ShaderStage {
    /// Conventional file extension, also used in diagnostic dump names.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Geometry => "geom",
            Self::Fragment => "frag",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Rgba16F,
    Rgba32F,
    Depth24,
    Depth32F,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth24 | Self::Depth32F)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Array layers; 1 for a plain 2D texture.
    pub layers: u32,
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn new_2d(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            layers: 1,
            format,
        }
    }

    pub fn new_array(
        label: impl Into<String>,
        width: u32,
        height: u32,
        layers: u32,
        format: TextureFormat,
    ) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            layers,
            format,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Color(TextureHandle),
    Depth(TextureHandle),
    /// One layer of an array depth texture.
    DepthLayer(TextureHandle, u32),
}

/// Object kinds that can carry a debug label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Buffer,
    VertexArray,
    Texture,
    Framebuffer,
    Stage,
    Program,
}

/// A uniform as reported by program introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUniform {
    /// Name without any array suffix.
    pub name: String,
    /// 1 for non-array uniforms.
    pub array_len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniformLocation(pub i32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

macro_rules! uniform_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for UniformValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

uniform_from!(i32 => Int, f32 => Float, Vec2 => Vec2, Vec3 => Vec3, Vec4 => Vec4, Mat4 => Mat4);

/// The stateful graphics API the core drives.
///
/// Implementations keep whatever driver state they need; the core tracks the
/// currently bound program, vertex array and framebuffer itself and avoids
/// redundant calls. Compile and link failures are reported as the driver's
/// info log.
pub trait GraphicsBackend: Send {
    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> BufferHandle;
    fn delete_buffer(&mut self, buffer: BufferHandle);

    fn create_vertex_array(
        &mut self,
        layout: &VertexLayout,
        vertices: BufferHandle,
        indices: Option<BufferHandle>,
    ) -> VertexArrayHandle;
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle);
    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayHandle>);

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle;
    fn delete_texture(&mut self, texture: TextureHandle);
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);

    /// Fails with a description when the attachment set is incomplete.
    fn create_framebuffer(&mut self, attachments: &[Attachment]) -> Result<FramebufferHandle, String>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);
    /// `None` binds the default (window) framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);
    fn set_viewport(&mut self, width: u32, height: u32);
    fn clear(&mut self, color: Vec4, depth: bool);

    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageHandle, String>;
    fn delete_stage(&mut self, stage: StageHandle);
    fn link_program(&mut self, stages: &[StageHandle]) -> Result<ProgramHandle, String>;
    fn delete_program(&mut self, program: ProgramHandle);
    fn active_uniforms(&self, program: ProgramHandle) -> Vec<ActiveUniform>;
    fn active_uniform_blocks(&self, program: ProgramHandle) -> Vec<String>;
    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;
    fn uniform_block_index(&self, program: ProgramHandle, name: &str) -> Option<u32>;
    fn bind_uniform_block(&mut self, program: ProgramHandle, block_index: u32, binding: u32);
    fn use_program(&mut self, program: Option<ProgramHandle>);
    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue);

    fn draw(&mut self, topology: Topology, count: u32, indexed: bool);

    fn push_debug_group(&mut self, message: &str);
    fn pop_debug_group(&mut self);
    fn object_label(&mut self, kind: ObjectKind, raw: u32, label: &str);
}
