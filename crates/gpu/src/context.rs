use crate::GpuError;
use crate::backend::{
    Attachment, FramebufferHandle, GraphicsBackend, ObjectKind, ProgramHandle, TextureDesc, TextureHandle, Topology,
    UniformLocation, UniformValue, VertexArrayHandle,
};
use crate::debug::DebugLabels;
use crate::hash::ContentKey;
use crate::shader::CompiledProgram;
use crate::shader_cache::ShaderCache;
use crate::texture::{TextureId, TextureRegistry};
use crate::vertex::{IndexData, VertexData};
use crate::vertex_array::{VertexArrayBinding, VertexArrayCache};
use glam::Vec4;
use kiln_assets::AssetResolver;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of reloading every live shader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub reloaded: usize,
    pub failed: usize,
}

/// Point-in-time resource counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuStats {
    pub vertex_arrays: usize,
    pub programs: usize,
    pub live_textures: usize,
    pub orphaned_textures: usize,
    pub freed_textures: u64,
    pub uniform_uploads: u64,
    pub uniform_uploads_skipped: u64,
}

#[derive(Debug, Default)]
struct Bound {
    program: Option<ProgramHandle>,
    vertex_array: Option<VertexArrayHandle>,
    framebuffer: Option<FramebufferHandle>,
}

/// The render thread's view of the GPU: the backend, the resource caches and
/// the bound-state shadow used to skip redundant driver calls.
pub struct GpuContext {
    backend: Box<dyn GraphicsBackend>,
    assets: Arc<dyn AssetResolver>,
    vertex_arrays: VertexArrayCache,
    shaders: ShaderCache,
    textures: TextureRegistry,
    debug: DebugLabels,
    dump_dir: Option<PathBuf>,
    bound: Bound,
    applied: HashMap<(ProgramHandle, UniformLocation), UniformValue>,
    uniform_uploads: u64,
    uniform_uploads_skipped: u64,
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("stats", &self.stats())
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl GpuContext {
    pub fn new(backend: Box<dyn GraphicsBackend>, assets: Arc<dyn AssetResolver>) -> Self {
        Self {
            backend,
            assets,
            vertex_arrays: VertexArrayCache::new(),
            shaders: ShaderCache::new(),
            textures: TextureRegistry::new(),
            debug: DebugLabels::default(),
            dump_dir: None,
            bound: Bound::default(),
            applied: HashMap::new(),
            uniform_uploads: 0,
            uniform_uploads_skipped: 0,
        }
    }

    /// Enable object labels and debug groups.
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = DebugLabels::new(enabled);
        self
    }

    /// Directory that receives shader compile and link failure dumps.
    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    pub fn backend_mut(&mut self) -> &mut dyn GraphicsBackend {
        self.backend.as_mut()
    }

    pub fn assets(&self) -> &dyn AssetResolver {
        self.assets.as_ref()
    }

    pub fn vertex_arrays(&self) -> &VertexArrayCache {
        &self.vertex_arrays
    }

    pub fn shaders(&self) -> &ShaderCache {
        &self.shaders
    }

    pub(crate) fn shaders_mut(&mut self) -> &mut ShaderCache {
        &mut self.shaders
    }

    pub fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    pub fn debug(&self) -> &DebugLabels {
        &self.debug
    }

    pub fn stats(&self) -> GpuStats {
        GpuStats {
            vertex_arrays: self.vertex_arrays.len(),
            programs: self.shaders.len(),
            live_textures: self.textures.live_count(),
            orphaned_textures: self.textures.orphaned_count(),
            freed_textures: self.textures.freed_total(),
            uniform_uploads: self.uniform_uploads,
            uniform_uploads_skipped: self.uniform_uploads_skipped,
        }
    }

    pub(crate) fn label(&mut self, kind: ObjectKind, raw: u32, label: &str) {
        self.debug.label(self.backend.as_mut(), kind, raw, label);
    }

    pub fn push_debug_group(&mut self, verb: &str, target: &str) {
        self.debug.push_group(self.backend.as_mut(), verb, target);
    }

    pub fn pop_debug_group(&mut self) {
        self.debug.pop_group(self.backend.as_mut());
    }

    // --- programs and uniforms ---

    /// Returns `false` when `program` was already current.
    pub fn use_program(&mut self, program: Option<ProgramHandle>) -> bool {
        if self.bound.program == program {
            return false;
        }
        self.backend.use_program(program);
        self.bound.program = program;
        true
    }

    /// Upload `value` unless it is what was last applied at this location.
    /// `program` must be current.
    pub fn apply_uniform(&mut self, program: ProgramHandle, location: UniformLocation, value: UniformValue) -> bool {
        if self.applied.get(&(program, location)) == Some(&value) {
            self.uniform_uploads_skipped += 1;
            return false;
        }
        self.backend.set_uniform(location, &value);
        self.applied.insert((program, location), value);
        self.uniform_uploads += 1;
        true
    }

    pub(crate) fn insert_program(&mut self, program: CompiledProgram) -> Arc<CompiledProgram> {
        self.shaders.insert_or_adopt(self.backend.as_mut(), program)
    }

    pub(crate) fn release_program(&mut self, key: &ContentKey) {
        if let Some(program) = self.shaders.release(self.backend.as_mut(), key) {
            let handle = program.handle();
            self.applied.retain(|(p, _), _| *p != handle);
            if self.bound.program == Some(handle) {
                self.bound.program = None;
            }
            tracing::debug!(key = %key, program = handle.0, "program deleted");
        }
    }

    /// Reload every live shader from source.
    pub fn reload_shaders(&mut self) -> ReloadReport {
        let _span = tracing::info_span!("reload_shaders").entered();
        let mut report = ReloadReport::default();
        for shader in self.shaders.live_shaders() {
            if !shader.is_compiled() {
                continue;
            }
            if shader.reload(self) {
                report.reloaded += 1;
            } else {
                report.failed += 1;
            }
        }
        tracing::info!(reloaded = report.reloaded, failed = report.failed, "shader reload finished");
        report
    }

    pub(crate) fn dump_failure(&self, shader: &str, what: &str, log: &str, source: &str) {
        let Some(dir) = &self.dump_dir else {
            return;
        };
        let path = dir.join(format!("{}.{what}.log", shader.replace(['/', '\\'], "_")));
        let mut text = format!("{log}\n\n");
        for (i, line) in source.lines().enumerate() {
            text.push_str(&format!("{:4}: {line}\n", i + 1));
        }
        let written = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, text));
        match written {
            Ok(()) => tracing::info!(path = %path.display(), "shader failure dumped"),
            Err(err) => tracing::warn!(path = %path.display(), %err, "could not write shader dump"),
        }
    }

    // --- vertex arrays ---

    pub(crate) fn acquire_vertex_array(
        &mut self,
        key: ContentKey,
        label: &str,
        vertices: &VertexData,
        indices: Option<&IndexData>,
    ) -> VertexArrayBinding {
        self.vertex_arrays
            .acquire(self.backend.as_mut(), &self.debug, key, label, vertices, indices)
    }

    pub(crate) fn release_vertex_array(&mut self, key: ContentKey) {
        if let Some(handle) = self.vertex_arrays.release(self.backend.as_mut(), key) {
            if self.bound.vertex_array == Some(handle) {
                self.bound.vertex_array = None;
            }
        }
    }

    pub fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayHandle>) {
        if self.bound.vertex_array != vertex_array {
            self.backend.bind_vertex_array(vertex_array);
            self.bound.vertex_array = vertex_array;
        }
    }

    pub fn draw(&mut self, topology: Topology, count: u32, indexed: bool) {
        self.backend.draw(topology, count, indexed);
    }

    // --- textures ---

    pub fn create_texture(&mut self, desc: TextureDesc) -> TextureId {
        let handle = self.backend.create_texture(&desc);
        self.debug
            .label(self.backend.as_mut(), ObjectKind::Texture, handle.0, &desc.label);
        let id = self.textures.insert(handle, desc);
        tracing::trace!(?id, "texture created");
        id
    }

    pub fn texture_handle(&self, id: TextureId) -> Result<TextureHandle, GpuError> {
        self.textures.handle(id).ok_or(GpuError::StaleTexture(id))
    }

    pub fn bind_texture(&mut self, unit: u32, id: TextureId) -> Result<(), GpuError> {
        let handle = self.texture_handle(id)?;
        self.backend.bind_texture(unit, handle);
        Ok(())
    }

    /// Claim a texture for another owner.
    pub fn retain_texture(&mut self, id: TextureId) -> Result<(), GpuError> {
        if self.textures.retain(id) {
            Ok(())
        } else {
            Err(GpuError::StaleTexture(id))
        }
    }

    /// Drop an owner's claim. The last release hands the texture to the next
    /// sweep. Returns `false` for dead ids.
    pub fn release_texture(&mut self, id: TextureId) -> bool {
        self.textures.release(id)
    }

    /// Free every orphaned texture.
    pub fn sweep_textures(&mut self) -> usize {
        let freed = self.textures.sweep(self.backend.as_mut());
        if freed > 0 {
            tracing::debug!(freed, live = self.textures.live_count(), "texture sweep");
        }
        freed
    }

    // --- framebuffers ---

    pub fn create_framebuffer(&mut self, label: &str, attachments: &[Attachment]) -> Result<FramebufferHandle, GpuError> {
        let handle = self
            .backend
            .create_framebuffer(attachments)
            .map_err(|reason| GpuError::FramebufferIncomplete {
                label: label.to_string(),
                reason,
            })?;
        self.debug
            .label(self.backend.as_mut(), ObjectKind::Framebuffer, handle.0, label);
        Ok(handle)
    }

    pub fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.bound.framebuffer == Some(framebuffer) {
            self.bind_framebuffer(None);
        }
        self.backend.delete_framebuffer(framebuffer);
    }

    /// `None` is the default framebuffer.
    pub fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        if self.bound.framebuffer != framebuffer {
            self.backend.bind_framebuffer(framebuffer);
            self.bound.framebuffer = framebuffer;
        }
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.backend.set_viewport(width, height);
    }

    pub fn clear(&mut self, color: Vec4, depth: bool) {
        self.backend.clear(color, depth);
    }

    /// Final sweep at shutdown. Anything still cached was never released by
    /// its owner and is reported.
    pub fn shutdown(&mut self) {
        self.sweep_textures();
        if !self.vertex_arrays.is_empty() || !self.shaders.is_empty() || self.textures.live_count() > 0 {
            tracing::warn!(
                vertex_arrays = self.vertex_arrays.len(),
                programs = self.shaders.len(),
                textures = self.textures.live_count(),
                "GPU resources still alive at shutdown"
            );
        }
    }
}
