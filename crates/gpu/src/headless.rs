//! Recording backend that runs without a GPU.
//!
//! Handles are plain counters, GLSL "compilation" checks for an entry point
//! and `#error` directives, and program introspection reads `uniform`
//! declarations from the stage sources. Every state-changing call is logged so
//! tests can assert on exactly what the core asked the driver to do.

use crate::backend::{
    ActiveUniform, Attachment, BufferHandle, BufferKind, FramebufferHandle, GraphicsBackend, ObjectKind,
    ProgramHandle, ShaderStage, StageHandle, TextureDesc, TextureHandle, Topology, UniformLocation,
    UniformValue, VertexArrayHandle,
};
use crate::vertex::VertexLayout;
use glam::Vec4;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A state-changing call as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    UseProgram(Option<ProgramHandle>),
    SetUniform(UniformLocation, UniformValue),
    BindUniformBlock { program: ProgramHandle, block: u32, binding: u32 },
    BindVertexArray(Option<VertexArrayHandle>),
    BindTexture(u32, TextureHandle),
    BindFramebuffer(Option<FramebufferHandle>),
    Viewport(u32, u32),
    Clear { color: Vec4, depth: bool },
    Draw { topology: Topology, count: u32, indexed: bool },
    PushDebugGroup(String),
    PopDebugGroup,
    Label { kind: ObjectKind, raw: u32, label: String },
}

#[derive(Debug, Default)]
struct ProgramInfo {
    uniforms: Vec<ActiveUniform>,
    blocks: Vec<String>,
    locations: HashMap<String, i32>,
}

#[derive(Debug, Default)]
struct Recorder {
    next_handle: u32,
    calls: Vec<BackendCall>,
    created: HashMap<ObjectKind, u64>,
    deleted: HashMap<ObjectKind, u64>,
    double_deletes: u64,
    live: HashMap<ObjectKind, HashSet<u32>>,
    textures: HashMap<u32, TextureDesc>,
    stages: HashMap<u32, (ShaderStage, String)>,
    programs: HashMap<u32, ProgramInfo>,
    compiles: u64,
    links: u64,
}

impl Recorder {
    fn alloc(&mut self, kind: ObjectKind) -> u32 {
        self.next_handle += 1;
        *self.created.entry(kind).or_default() += 1;
        self.live.entry(kind).or_default().insert(self.next_handle);
        self.next_handle
    }

    fn release(&mut self, kind: ObjectKind, raw: u32) {
        if self.live.entry(kind).or_default().remove(&raw) {
            *self.deleted.entry(kind).or_default() += 1;
        } else {
            self.double_deletes += 1;
            tracing::warn!(?kind, raw, "headless backend: delete of unknown or already deleted object");
        }
    }
}

/// Shared view of a [`HeadlessBackend`]'s counters and call log. Stays valid
/// after the backend has been boxed into a GPU context.
#[derive(Debug, Clone, Default)]
pub struct HeadlessStats(Arc<Mutex<Recorder>>);

impl HeadlessStats {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.0.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.lock().calls.clear();
    }

    pub fn count_calls(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.0.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn created(&self, kind: ObjectKind) -> u64 {
        self.0.lock().created.get(&kind).copied().unwrap_or(0)
    }

    pub fn deleted(&self, kind: ObjectKind) -> u64 {
        self.0.lock().deleted.get(&kind).copied().unwrap_or(0)
    }

    pub fn live(&self, kind: ObjectKind) -> usize {
        self.0.lock().live.get(&kind).map_or(0, HashSet::len)
    }

    pub fn is_live(&self, kind: ObjectKind, raw: u32) -> bool {
        self.0
            .lock()
            .live
            .get(&kind)
            .is_some_and(|set| set.contains(&raw))
    }

    pub fn live_textures(&self) -> usize {
        self.live(ObjectKind::Texture)
    }

    pub fn live_programs(&self) -> usize {
        self.live(ObjectKind::Program)
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.live(ObjectKind::VertexArray)
    }

    /// Deletes of objects that were not live. Always zero for a correct core.
    pub fn double_deletes(&self) -> u64 {
        self.0.lock().double_deletes
    }

    pub fn compile_count(&self) -> u64 {
        self.0.lock().compiles
    }

    pub fn link_count(&self) -> u64 {
        self.0.lock().links
    }

    pub fn draw_count(&self) -> usize {
        self.count_calls(|c| matches!(c, BackendCall::Draw { .. }))
    }
}

/// See the module docs.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    state: HeadlessStats,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> HeadlessStats {
        self.state.clone()
    }

    fn record(&self, call: BackendCall) {
        self.state.0.lock().calls.push(call);
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn create_buffer(&mut self, _kind: BufferKind, _data: &[u8]) -> BufferHandle {
        BufferHandle(self.state.0.lock().alloc(ObjectKind::Buffer))
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.state.0.lock().release(ObjectKind::Buffer, buffer.0);
    }

    fn create_vertex_array(
        &mut self,
        _layout: &VertexLayout,
        _vertices: BufferHandle,
        _indices: Option<BufferHandle>,
    ) -> VertexArrayHandle {
        VertexArrayHandle(self.state.0.lock().alloc(ObjectKind::VertexArray))
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.state.0.lock().release(ObjectKind::VertexArray, vertex_array.0);
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayHandle>) {
        self.record(BackendCall::BindVertexArray(vertex_array));
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle {
        let mut state = self.state.0.lock();
        let raw = state.alloc(ObjectKind::Texture);
        state.textures.insert(raw, desc.clone());
        TextureHandle(raw)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        let mut state = self.state.0.lock();
        state.release(ObjectKind::Texture, texture.0);
        state.textures.remove(&texture.0);
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.record(BackendCall::BindTexture(unit, texture));
    }

    fn create_framebuffer(&mut self, attachments: &[Attachment]) -> Result<FramebufferHandle, String> {
        let mut state = self.state.0.lock();
        if attachments.is_empty() {
            return Err("no attachments".into());
        }

        let mut size = None;
        for attachment in attachments {
            let (texture, layer, wants_depth) = match *attachment {
                Attachment::Color(t) => (t, None, false),
                Attachment::Depth(t) => (t, None, true),
                Attachment::DepthLayer(t, layer) => (t, Some(layer), true),
            };
            let desc = state
                .textures
                .get(&texture.0)
                .ok_or_else(|| format!("attachment texture {} does not exist", texture.0))?;
            if desc.format.is_depth() != wants_depth {
                return Err(format!(
                    "texture '{}' ({:?}) cannot be used at this attachment point",
                    desc.label, desc.format
                ));
            }
            if let Some(layer) = layer {
                if layer >= desc.layers {
                    return Err(format!(
                        "layer {layer} out of range for '{}' with {} layers",
                        desc.label, desc.layers
                    ));
                }
            }
            match size {
                None => size = Some((desc.width, desc.height)),
                Some(s) if s != (desc.width, desc.height) => {
                    return Err(format!(
                        "attachment '{}' is {}x{}, expected {}x{}",
                        desc.label, desc.width, desc.height, s.0, s.1
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(FramebufferHandle(state.alloc(ObjectKind::Framebuffer)))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.state.0.lock().release(ObjectKind::Framebuffer, framebuffer.0);
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.record(BackendCall::BindFramebuffer(framebuffer));
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.record(BackendCall::Viewport(width, height));
    }

    fn clear(&mut self, color: Vec4, depth: bool) {
        self.record(BackendCall::Clear { color, depth });
    }

    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageHandle, String> {
        let mut state = self.state.0.lock();
        state.compiles += 1;
        if let Some((line, text)) = source
            .lines()
            .enumerate()
            .find(|(_, l)| l.trim_start().starts_with("#error"))
        {
            return Err(format!("0:{}: {}", line + 1, text.trim()));
        }
        if !source.contains("main") {
            return Err("no entry point 'main'".into());
        }
        let raw = state.alloc(ObjectKind::Stage);
        state.stages.insert(raw, (stage, source.to_string()));
        Ok(StageHandle(raw))
    }

    fn delete_stage(&mut self, stage: StageHandle) {
        let mut state = self.state.0.lock();
        state.release(ObjectKind::Stage, stage.0);
        state.stages.remove(&stage.0);
    }

    fn link_program(&mut self, stages: &[StageHandle]) -> Result<ProgramHandle, String> {
        let mut state = self.state.0.lock();
        state.links += 1;

        let mut info = ProgramInfo::default();
        let mut has_vertex = false;
        for handle in stages {
            let (stage, source) = state
                .stages
                .get(&handle.0)
                .ok_or_else(|| format!("stage {} is not compiled", handle.0))?;
            has_vertex |= *stage == ShaderStage::Vertex;
            parse_declarations(source, &mut info.uniforms, &mut info.blocks);
        }
        if !has_vertex {
            return Err("program has no vertex stage".into());
        }

        let mut next = 0i32;
        for uniform in &info.uniforms {
            info.locations.insert(uniform.name.clone(), next);
            if uniform.array_len > 1 {
                for i in 0..uniform.array_len {
                    info.locations
                        .insert(format!("{}[{i}]", uniform.name), next + i as i32);
                }
            }
            next += uniform.array_len as i32;
        }

        let raw = state.alloc(ObjectKind::Program);
        state.programs.insert(raw, info);
        Ok(ProgramHandle(raw))
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        let mut state = self.state.0.lock();
        state.release(ObjectKind::Program, program.0);
        state.programs.remove(&program.0);
    }

    fn active_uniforms(&self, program: ProgramHandle) -> Vec<ActiveUniform> {
        self.state
            .0
            .lock()
            .programs
            .get(&program.0)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn active_uniform_blocks(&self, program: ProgramHandle) -> Vec<String> {
        self.state
            .0
            .lock()
            .programs
            .get(&program.0)
            .map(|p| p.blocks.clone())
            .unwrap_or_default()
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        self.state
            .0
            .lock()
            .programs
            .get(&program.0)
            .and_then(|p| p.locations.get(name).copied())
            .map(UniformLocation)
    }

    fn uniform_block_index(&self, program: ProgramHandle, name: &str) -> Option<u32> {
        self.state
            .0
            .lock()
            .programs
            .get(&program.0)
            .and_then(|p| p.blocks.iter().position(|b| b == name))
            .map(|i| i as u32)
    }

    fn bind_uniform_block(&mut self, program: ProgramHandle, block_index: u32, binding: u32) {
        self.record(BackendCall::BindUniformBlock {
            program,
            block: block_index,
            binding,
        });
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.record(BackendCall::UseProgram(program));
    }

    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue) {
        self.record(BackendCall::SetUniform(location, *value));
    }

    fn draw(&mut self, topology: Topology, count: u32, indexed: bool) {
        self.record(BackendCall::Draw {
            topology,
            count,
            indexed,
        });
    }

    fn push_debug_group(&mut self, message: &str) {
        self.record(BackendCall::PushDebugGroup(message.to_string()));
    }

    fn pop_debug_group(&mut self) {
        self.record(BackendCall::PopDebugGroup);
    }

    fn object_label(&mut self, kind: ObjectKind, raw: u32, label: &str) {
        self.record(BackendCall::Label {
            kind,
            raw,
            label: label.to_string(),
        });
    }
}

/// Collect `uniform` declarations and uniform block names from GLSL source.
/// Array sizes may be literals or names `#define`d in the same source.
fn parse_declarations(source: &str, uniforms: &mut Vec<ActiveUniform>, blocks: &mut Vec<String>) {
    let defines: HashMap<&str, &str> = source
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("#define ")?;
            let mut parts = rest.split_whitespace();
            Some((parts.next()?, parts.next().unwrap_or("")))
        })
        .collect();

    for line in source.lines() {
        let line = line.trim();
        let Some(pos) = line.find("uniform ") else {
            continue;
        };
        if pos != 0 && !line.starts_with("layout") {
            continue;
        }
        let decl = line[pos + "uniform ".len()..].trim().trim_end_matches(';').trim();

        if decl.ends_with('{') {
            let name = decl.trim_end_matches('{').trim().to_string();
            if !name.is_empty() && !blocks.contains(&name) {
                blocks.push(name);
            }
            continue;
        }

        let Some(last) = decl.split_whitespace().last() else {
            continue;
        };
        let (name, array_len) = match last.find('[') {
            Some(open) => {
                let size = last[open + 1..].trim_end_matches(']');
                let len = size
                    .parse::<u32>()
                    .ok()
                    .or_else(|| defines.get(size).and_then(|v| v.parse().ok()))
                    .unwrap_or(1);
                (&last[..open], len)
            }
            None => (last, 1),
        };
        if !uniforms.iter().any(|u| u.name == name) {
            uniforms.push(ActiveUniform {
                name: name.to_string(),
                array_len,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TextureFormat;

    const VERT: &str = "#version 330 core\n\
        #define MAX_LIGHTS 3\n\
        uniform mat4 u_model;\n\
        uniform vec3 u_lights[MAX_LIGHTS];\n\
        layout(std140) uniform Camera {\n\
            mat4 view_proj;\n\
        };\n\
        void main() {}\n";

    #[test]
    fn introspects_uniforms_and_blocks() {
        let mut backend = HeadlessBackend::new();
        let vs = backend.compile_stage(ShaderStage::Vertex, VERT).unwrap();
        let fs = backend
            .compile_stage(ShaderStage::Fragment, "uniform mat4 u_model;\nuniform float u_alpha;\nvoid main() {}")
            .unwrap();
        let program = backend.link_program(&[vs, fs]).unwrap();

        let uniforms = backend.active_uniforms(program);
        assert_eq!(uniforms.len(), 3);
        assert_eq!(
            uniforms[1],
            ActiveUniform {
                name: "u_lights".into(),
                array_len: 3
            }
        );
        assert_eq!(backend.uniform_location(program, "u_model"), Some(UniformLocation(0)));
        assert_eq!(backend.uniform_location(program, "u_lights[2]"), Some(UniformLocation(3)));
        assert_eq!(backend.uniform_location(program, "u_alpha"), Some(UniformLocation(4)));
        assert_eq!(backend.uniform_block_index(program, "Camera"), Some(0));
        assert_eq!(backend.uniform_location(program, "missing"), None);
    }

    #[test]
    fn error_directive_fails_compilation() {
        let mut backend = HeadlessBackend::new();
        let err = backend
            .compile_stage(ShaderStage::Fragment, "void main() {}\n#error broken")
            .unwrap_err();
        assert!(err.starts_with("0:2:"));
    }

    #[test]
    fn link_requires_vertex_stage() {
        let mut backend = HeadlessBackend::new();
        let fs = backend.compile_stage(ShaderStage::Fragment, "void main() {}").unwrap();
        assert!(backend.link_program(&[fs]).is_err());
    }

    #[test]
    fn framebuffer_completeness() {
        let mut backend = HeadlessBackend::new();
        let color = backend.create_texture(&TextureDesc::new_2d("c", 8, 8, TextureFormat::Rgba8));
        let depth = backend.create_texture(&TextureDesc::new_2d("d", 8, 8, TextureFormat::Depth24));
        let small = backend.create_texture(&TextureDesc::new_2d("s", 4, 4, TextureFormat::Rgba8));
        let array = backend.create_texture(&TextureDesc::new_array("a", 8, 8, 2, TextureFormat::Depth32F));

        assert!(backend.create_framebuffer(&[]).is_err());
        assert!(
            backend
                .create_framebuffer(&[Attachment::Color(color), Attachment::Depth(depth)])
                .is_ok()
        );
        assert!(backend.create_framebuffer(&[Attachment::Color(depth)]).is_err());
        assert!(
            backend
                .create_framebuffer(&[Attachment::Color(color), Attachment::Color(small)])
                .is_err()
        );
        assert!(backend.create_framebuffer(&[Attachment::DepthLayer(array, 1)]).is_ok());
        assert!(backend.create_framebuffer(&[Attachment::DepthLayer(array, 2)]).is_err());
    }

    #[test]
    fn counts_creates_and_deletes() {
        let mut backend = HeadlessBackend::new();
        let stats = backend.stats();
        let buffer = backend.create_buffer(BufferKind::Vertex, &[0; 4]);
        assert_eq!(stats.live(ObjectKind::Buffer), 1);
        backend.delete_buffer(buffer);
        backend.delete_buffer(buffer);
        assert_eq!(stats.created(ObjectKind::Buffer), 1);
        assert_eq!(stats.deleted(ObjectKind::Buffer), 1);
        assert_eq!(stats.double_deletes(), 1);
    }
}
