use crate::GpuContext;
use crate::GpuError;
use crate::backend::{ActiveUniform, GraphicsBackend, ObjectKind, ProgramHandle, ShaderStage, StageHandle, UniformLocation, UniformValue};
use crate::hash::{ContentKey, KeyBuilder};
use crate::preprocess::preprocess;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Where a shader's stages come from and which defines it is built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderDesc {
    pub name: String,
    /// Asset sub-path per stage.
    pub stages: BTreeMap<ShaderStage, String>,
    pub defines: BTreeMap<String, String>,
}

impl ShaderDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: BTreeMap::new(),
            defines: BTreeMap::new(),
        }
    }

    pub fn stage(mut self, stage: ShaderStage, sub_path: impl Into<String>) -> Self {
        self.stages.insert(stage, sub_path.into());
        self
    }

    pub fn define(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.defines.insert(name.into(), value.to_string());
        self
    }
}

/// A linked program with its introspected uniform tables.
#[derive(Debug)]
pub struct CompiledProgram {
    key: ContentKey,
    handle: ProgramHandle,
    stages: Vec<StageHandle>,
    uniforms: Vec<ActiveUniform>,
    locations: HashMap<String, UniformLocation>,
    blocks: HashMap<String, u32>,
}

impl CompiledProgram {
    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn stages(&self) -> &[StageHandle] {
        &self.stages
    }

    pub fn uniforms(&self) -> &[ActiveUniform] {
        &self.uniforms
    }

    /// Location of `name`, including expanded array elements (`name[2]`).
    pub fn location(&self, name: &str) -> Option<UniformLocation> {
        self.locations.get(name).copied()
    }

    pub fn block_index(&self, name: &str) -> Option<u32> {
        self.blocks.get(name).copied()
    }

    pub(crate) fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        backend.delete_program(self.handle);
        for stage in &self.stages {
            backend.delete_stage(*stage);
        }
    }
}

pub(crate) struct ShaderInner {
    desc: ShaderDesc,
    program: ArcSwapOption<CompiledProgram>,
    values: Mutex<BTreeMap<String, UniformValue>>,
}

impl fmt::Debug for ShaderInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderInner")
            .field("name", &self.desc.name)
            .field("key", &self.program.load().as_ref().map(|p| p.key))
            .finish()
    }
}

/// A shader instance. Clones share the instance, so a reload is observed by
/// every holder without re-acquiring anything.
#[derive(Debug, Clone)]
pub struct Shader {
    inner: Arc<ShaderInner>,
}

impl Shader {
    pub fn new(desc: ShaderDesc) -> Self {
        Self {
            inner: Arc::new(ShaderInner {
                desc,
                program: ArcSwapOption::empty(),
                values: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ShaderInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.desc.name
    }

    pub fn desc(&self) -> &ShaderDesc {
        &self.inner.desc
    }

    pub fn same_instance(&self, other: &Shader) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_compiled(&self) -> bool {
        self.inner.program.load().is_some()
    }

    pub fn program(&self) -> Option<Arc<CompiledProgram>> {
        self.inner.program.load_full()
    }

    pub fn key(&self) -> Option<ContentKey> {
        self.inner.program.load().as_ref().map(|p| p.key)
    }

    /// Preprocess every stage and adopt the cached program for the result, or
    /// compile and link a new one. Failures are dumped to the context's dump
    /// directory and returned.
    pub fn compile(&self, gpu: &mut GpuContext) -> Result<(), GpuError> {
        let _span = tracing::debug_span!("shader_compile", shader = %self.name()).entered();
        let sources = self.preprocess(gpu)?;
        let key = source_key(&sources);
        if self.key() == Some(key) {
            return Ok(());
        }

        let program = match gpu.shaders_mut().adopt(&key) {
            Some(program) => {
                tracing::debug!(key = %key, "shader cache hit");
                program
            }
            None => {
                let built = build_program(gpu, self.name(), key, &sources)?;
                tracing::debug!(key = %key, program = built.handle.0, "shader compiled");
                gpu.insert_program(built)
            }
        };
        self.install(gpu, program);
        Ok(())
    }

    /// Rebuild from source, bypassing the cache, and swap the new program in.
    /// A failed reload is logged and leaves the previous program in place.
    pub fn reload(&self, gpu: &mut GpuContext) -> bool {
        let _span = tracing::debug_span!("shader_reload", shader = %self.name()).entered();
        let built = self.preprocess(gpu).and_then(|sources| {
            let key = source_key(&sources);
            build_program(gpu, self.name(), key, &sources)
        });
        match built {
            Ok(built) => {
                let program = gpu.insert_program(built);
                tracing::info!(shader = %self.name(), key = %program.key, "shader reloaded");
                self.install(gpu, program);
                true
            }
            Err(err) => {
                tracing::warn!(shader = %self.name(), %err, "shader reload failed; keeping previous program");
                false
            }
        }
    }

    fn preprocess(&self, gpu: &GpuContext) -> Result<Vec<(ShaderStage, String)>, GpuError> {
        if self.inner.desc.stages.is_empty() {
            return Err(GpuError::NoStages(self.name().to_string()));
        }
        self.inner
            .desc
            .stages
            .iter()
            .map(|(stage, sub_path)| {
                preprocess(gpu.assets(), sub_path, &self.inner.desc.defines).map(|source| (*stage, source))
            })
            .collect()
    }

    fn install(&self, gpu: &mut GpuContext, program: Arc<CompiledProgram>) {
        let previous = self.inner.program.swap(Some(program));
        gpu.shaders_mut().track(&self.inner);
        if let Some(previous) = previous {
            gpu.release_program(&previous.key);
        }
    }

    /// Store a uniform value; it reaches the GPU on the next [`bind`](Self::bind).
    pub fn set_uniform(&self, name: impl Into<String>, value: impl Into<UniformValue>) {
        self.inner.values.lock().insert(name.into(), value.into());
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.inner.values.lock().get(name).copied()
    }

    /// Make the program current and upload the stored uniforms that differ
    /// from what was last applied at their location.
    pub fn bind(&self, gpu: &mut GpuContext) -> Result<(), GpuError> {
        let program = self.require_program()?;
        gpu.use_program(Some(program.handle));
        let values = self.inner.values.lock();
        for (name, value) in values.iter() {
            let location = program.location(name).ok_or_else(|| GpuError::MissingUniform {
                shader: self.name().to_string(),
                name: name.clone(),
            })?;
            gpu.apply_uniform(program.handle, location, *value);
        }
        Ok(())
    }

    pub fn location(&self, name: &str) -> Result<UniformLocation, GpuError> {
        self.require_program()?
            .location(name)
            .ok_or_else(|| GpuError::MissingUniform {
                shader: self.name().to_string(),
                name: name.to_string(),
            })
    }

    pub fn uniform_block(&self, name: &str) -> Result<u32, GpuError> {
        self.require_program()?
            .block_index(name)
            .ok_or_else(|| GpuError::MissingUniformBlock {
                shader: self.name().to_string(),
                name: name.to_string(),
            })
    }

    pub fn bind_uniform_block(&self, gpu: &mut GpuContext, name: &str, binding: u32) -> Result<(), GpuError> {
        let index = self.uniform_block(name)?;
        let program = self.require_program()?;
        gpu.backend_mut().bind_uniform_block(program.handle, index, binding);
        Ok(())
    }

    /// Give this instance's program back to the cache. Clones share the
    /// instance, so this releases it for all of them.
    pub fn release(&self, gpu: &mut GpuContext) {
        if let Some(program) = self.inner.program.swap(None) {
            gpu.release_program(&program.key);
        }
    }

    fn require_program(&self) -> Result<Arc<CompiledProgram>, GpuError> {
        self.inner
            .program
            .load_full()
            .ok_or_else(|| GpuError::NotCompiled(self.name().to_string()))
    }
}

fn source_key(sources: &[(ShaderStage, String)]) -> ContentKey {
    sources
        .iter()
        .fold(KeyBuilder::new("kiln.shader"), |builder, (stage, source)| {
            builder.field(stage.extension(), source.as_bytes())
        })
        .finish()
}

fn build_program(
    gpu: &mut GpuContext,
    name: &str,
    key: ContentKey,
    sources: &[(ShaderStage, String)],
) -> Result<CompiledProgram, GpuError> {
    let mut stages = Vec::with_capacity(sources.len());
    for (stage, source) in sources {
        match gpu.backend_mut().compile_stage(*stage, source) {
            Ok(handle) => {
                gpu.label(ObjectKind::Stage, handle.0, &format!("{name}.{}", stage.extension()));
                stages.push(handle);
            }
            Err(log) => {
                for handle in stages {
                    gpu.backend_mut().delete_stage(handle);
                }
                gpu.dump_failure(name, stage.extension(), &log, source);
                return Err(GpuError::Compile {
                    shader: name.to_string(),
                    stage: *stage,
                    log,
                });
            }
        }
    }

    let handle = match gpu.backend_mut().link_program(&stages) {
        Ok(handle) => handle,
        Err(log) => {
            for handle in stages {
                gpu.backend_mut().delete_stage(handle);
            }
            let joined: Vec<&str> = sources.iter().map(|(_, s)| s.as_str()).collect();
            gpu.dump_failure(name, "link", &log, &joined.join("\n"));
            return Err(GpuError::Link {
                shader: name.to_string(),
                log,
            });
        }
    };
    gpu.label(ObjectKind::Program, handle.0, name);

    let backend = gpu.backend_mut();
    let uniforms = backend.active_uniforms(handle);
    let mut locations = HashMap::new();
    for uniform in &uniforms {
        if let Some(location) = backend.uniform_location(handle, &uniform.name) {
            locations.insert(uniform.name.clone(), location);
        }
        if uniform.array_len > 1 {
            for i in 0..uniform.array_len {
                let element = format!("{}[{i}]", uniform.name);
                if let Some(location) = backend.uniform_location(handle, &element) {
                    locations.insert(element, location);
                }
            }
        }
    }
    let blocks = backend
        .active_uniform_blocks(handle)
        .into_iter()
        .filter_map(|block| backend.uniform_block_index(handle, &block).map(|i| (block, i)))
        .collect();

    Ok(CompiledProgram {
        key,
        handle,
        stages,
        uniforms,
        locations,
        blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{BackendCall, HeadlessBackend, HeadlessStats};
    use kiln_assets::MemoryAssets;

    const VERT: &str = "#version 330 core\n\
        #include \"common.glsl\"\n\
        uniform mat4 u_model;\n\
        uniform vec3 u_lights[MAX_LIGHTS];\n\
        layout(std140) uniform Camera {\n    mat4 view_proj;\n};\n\
        void main() {}\n";
    const FRAG: &str = "#version 330 core\nuniform vec4 u_color;\nvoid main() {}\n";

    fn setup() -> (GpuContext, HeadlessStats, Arc<MemoryAssets>) {
        let assets = Arc::new(
            MemoryAssets::new()
                .with("shaders/mesh.vert", VERT)
                .with("shaders/mesh.frag", FRAG)
                .with("shaders/common.glsl", "#define MAX_LIGHTS 4"),
        );
        let backend = HeadlessBackend::new();
        let stats = backend.stats();
        (GpuContext::new(Box::new(backend), assets.clone()), stats, assets)
    }

    fn mesh_desc() -> ShaderDesc {
        ShaderDesc::new("mesh")
            .stage(ShaderStage::Vertex, "shaders/mesh.vert")
            .stage(ShaderStage::Fragment, "shaders/mesh.frag")
    }

    #[test]
    fn identical_sources_share_one_program() {
        let (mut gpu, stats, _) = setup();
        let a = Shader::new(mesh_desc());
        let b = Shader::new(mesh_desc());
        a.compile(&mut gpu).unwrap();
        b.compile(&mut gpu).unwrap();

        assert_eq!(a.key(), b.key());
        assert_eq!(a.program().unwrap().handle(), b.program().unwrap().handle());
        assert_eq!(stats.link_count(), 1);
        assert_eq!(gpu.shaders().hits(), 1);
        assert_eq!(gpu.shaders().uses(&a.key().unwrap()), 2);

        a.release(&mut gpu);
        assert_eq!(stats.live_programs(), 1);
        b.release(&mut gpu);
        assert_eq!(stats.live_programs(), 0);
        assert!(gpu.shaders().is_empty());
    }

    #[test]
    fn changed_define_misses_the_cache() {
        let (mut gpu, stats, _) = setup();
        let a = Shader::new(mesh_desc().define("SHADOWS", 1));
        let b = Shader::new(mesh_desc().define("SHADOWS", 0));
        a.compile(&mut gpu).unwrap();
        b.compile(&mut gpu).unwrap();
        assert_ne!(a.key(), b.key());
        assert_eq!(stats.link_count(), 2);

        let c = Shader::new(mesh_desc().define("SHADOWS", 1));
        c.compile(&mut gpu).unwrap();
        assert_eq!(c.key(), a.key());
        assert_eq!(stats.link_count(), 2);
    }

    #[test]
    fn array_uniforms_are_expanded() {
        let (mut gpu, _, _) = setup();
        let shader = Shader::new(mesh_desc());
        shader.compile(&mut gpu).unwrap();
        let program = shader.program().unwrap();
        for i in 0..4 {
            assert!(program.location(&format!("u_lights[{i}]")).is_some());
        }
        assert!(program.location("u_lights[4]").is_none());
        assert_eq!(shader.uniform_block("Camera").unwrap(), 0);
        assert!(matches!(
            shader.uniform_block("Lights"),
            Err(GpuError::MissingUniformBlock { .. })
        ));
    }

    #[test]
    fn bind_uploads_only_changed_uniforms() {
        let (mut gpu, stats, _) = setup();
        let shader = Shader::new(mesh_desc());
        shader.compile(&mut gpu).unwrap();
        shader.set_uniform("u_color", glam::Vec4::ONE);
        shader.set_uniform("u_model", glam::Mat4::IDENTITY);

        shader.bind(&mut gpu).unwrap();
        shader.bind(&mut gpu).unwrap();
        assert_eq!(stats.count_calls(|c| matches!(c, BackendCall::UseProgram(_))), 1);
        assert_eq!(stats.count_calls(|c| matches!(c, BackendCall::SetUniform(..))), 2);

        shader.set_uniform("u_color", glam::Vec4::ZERO);
        shader.bind(&mut gpu).unwrap();
        assert_eq!(stats.count_calls(|c| matches!(c, BackendCall::SetUniform(..))), 3);
        shader.release(&mut gpu);
    }

    #[test]
    fn unknown_uniform_fails_bind() {
        let (mut gpu, _, _) = setup();
        let shader = Shader::new(mesh_desc());
        shader.compile(&mut gpu).unwrap();
        shader.set_uniform("u_missing", 1.0);
        assert!(matches!(
            shader.bind(&mut gpu),
            Err(GpuError::MissingUniform { name, .. }) if name == "u_missing"
        ));
    }

    #[test]
    fn bind_before_compile_is_an_error() {
        let (mut gpu, _, _) = setup();
        let shader = Shader::new(mesh_desc());
        assert!(matches!(shader.bind(&mut gpu), Err(GpuError::NotCompiled(_))));
        assert!(matches!(
            Shader::new(ShaderDesc::new("empty")).compile(&mut gpu),
            Err(GpuError::NoStages(_))
        ));
    }

    #[test]
    fn compile_failure_writes_dump() {
        let dir = tempfile::tempdir().unwrap();
        let assets = Arc::new(
            MemoryAssets::new()
                .with("bad.vert", "void main() {}")
                .with("bad.frag", "void main() {}\n#error nope"),
        );
        let mut gpu = GpuContext::new(Box::new(HeadlessBackend::new()), assets).with_dump_dir(dir.path());
        let shader = Shader::new(
            ShaderDesc::new("bad")
                .stage(ShaderStage::Vertex, "bad.vert")
                .stage(ShaderStage::Fragment, "bad.frag"),
        );
        let err = shader.compile(&mut gpu).unwrap_err();
        assert!(matches!(err, GpuError::Compile { stage: ShaderStage::Fragment, .. }));
        let dump = std::fs::read_to_string(dir.path().join("bad.frag.log")).unwrap();
        assert!(dump.contains("#error nope"));
        assert!(!shader.is_compiled());
    }

    #[test]
    fn reload_swaps_program_for_every_holder() {
        let (mut gpu, stats, assets) = setup();
        let shader = Shader::new(mesh_desc());
        let holder = shader.clone();
        shader.compile(&mut gpu).unwrap();
        let old = shader.program().unwrap().handle();

        assets.insert("shaders/mesh.frag", "#version 330 core\nuniform vec4 u_tint;\nvoid main() {}\n");
        assert!(shader.reload(&mut gpu));
        let new = holder.program().unwrap().handle();
        assert_ne!(old, new);
        assert!(holder.location("u_tint").is_ok());
        assert!(!stats.is_live(ObjectKind::Program, old.0));
        assert_eq!(gpu.shaders().len(), 1);
    }

    #[test]
    fn failed_reload_keeps_previous_program() {
        let (mut gpu, stats, assets) = setup();
        let shader = Shader::new(mesh_desc());
        shader.compile(&mut gpu).unwrap();
        let before = shader.program().unwrap().handle();

        assets.insert("shaders/mesh.frag", "#error broken edit\nvoid main() {}");
        assert!(!shader.reload(&mut gpu));
        assert_eq!(shader.program().unwrap().handle(), before);
        assert!(stats.is_live(ObjectKind::Program, before.0));
        shader.bind(&mut gpu).unwrap();
    }

    #[test]
    fn reload_of_unchanged_source_keeps_cache_consistent() {
        let (mut gpu, stats, _) = setup();
        let a = Shader::new(mesh_desc());
        let b = Shader::new(mesh_desc());
        a.compile(&mut gpu).unwrap();
        b.compile(&mut gpu).unwrap();
        assert!(a.reload(&mut gpu));
        let key = a.key().unwrap();
        assert_eq!(gpu.shaders().uses(&key), 2);
        assert_eq!(stats.live_programs(), 1);
        a.release(&mut gpu);
        b.release(&mut gpu);
        assert_eq!(stats.live_programs(), 0);
        assert_eq!(stats.double_deletes(), 0);
    }
}
