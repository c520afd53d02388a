use crate::GpuContext;
use crate::GpuError;
use crate::backend::{BufferHandle, BufferKind, GraphicsBackend, ObjectKind, Topology, VertexArrayHandle};
use crate::debug::DebugLabels;
use crate::hash::{ContentKey, KeyBuilder};
use crate::vertex::{IndexData, VertexData, VertexLayout};
use std::collections::HashMap;

/// What a holder of a cached vertex array sees.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexArrayBinding {
    pub key: ContentKey,
    pub handle: VertexArrayHandle,
    pub layout: VertexLayout,
    pub vertex_count: u32,
    pub index_count: Option<u32>,
    pub topology: Topology,
}

impl VertexArrayBinding {
    /// Elements submitted per draw.
    pub fn draw_count(&self) -> u32 {
        self.index_count.unwrap_or(self.vertex_count)
    }
}

#[derive(Debug)]
struct Entry {
    binding: VertexArrayBinding,
    vertex_buffer: BufferHandle,
    index_buffer: Option<BufferHandle>,
    uses: usize,
}

/// Content-addressed vertex array objects shared between holders.
#[derive(Debug, Default)]
pub struct VertexArrayCache {
    entries: HashMap<ContentKey, Entry>,
    hits: u64,
    misses: u64,
}

impl VertexArrayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content key over vertex bytes, index bytes, layout and topology.
    pub fn key_for(vertices: &VertexData, indices: Option<&IndexData>) -> ContentKey {
        let topology = [vertices.topology() as u8];
        let mut builder = KeyBuilder::new("kiln.vertex-array")
            .field("vertices", vertices.bytes())
            .field("layout", &vertices.layout().signature())
            .field("topology", &topology);
        if let Some(indices) = indices {
            builder = builder
                .field("index-width", &[indices.width_tag()])
                .field("indices", indices.bytes());
        }
        builder.finish()
    }

    /// Adopt the cached entry for `key`, or upload and insert a new one.
    pub(crate) fn acquire(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        debug: &DebugLabels,
        key: ContentKey,
        label: &str,
        vertices: &VertexData,
        indices: Option<&IndexData>,
    ) -> VertexArrayBinding {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.uses += 1;
            self.hits += 1;
            tracing::trace!(key = %key, uses = entry.uses, label, "vertex array cache hit");
            return entry.binding.clone();
        }

        self.misses += 1;
        let vertex_buffer = backend.create_buffer(BufferKind::Vertex, vertices.bytes());
        let index_buffer = indices.map(|i| backend.create_buffer(BufferKind::Index, i.bytes()));
        let handle = backend.create_vertex_array(vertices.layout(), vertex_buffer, index_buffer);
        debug.label(backend, ObjectKind::VertexArray, handle.0, label);

        let binding = VertexArrayBinding {
            key,
            handle,
            layout: vertices.layout().clone(),
            vertex_count: vertices.count(),
            index_count: indices.map(IndexData::len),
            topology: vertices.topology(),
        };
        tracing::debug!(key = %key, label, vertices = binding.vertex_count, "vertex array uploaded");
        self.entries.insert(
            key,
            Entry {
                binding: binding.clone(),
                vertex_buffer,
                index_buffer,
                uses: 1,
            },
        );
        binding
    }

    /// Drop one use of `key`. Returns the deleted handle when this was the
    /// last one.
    pub(crate) fn release(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        key: ContentKey,
    ) -> Option<VertexArrayHandle> {
        let entry = self.entries.get_mut(&key)?;
        entry.uses -= 1;
        if entry.uses > 0 {
            return None;
        }

        let entry = self.entries.remove(&key)?;
        backend.delete_vertex_array(entry.binding.handle);
        backend.delete_buffer(entry.vertex_buffer);
        if let Some(index_buffer) = entry.index_buffer {
            backend.delete_buffer(index_buffer);
        }
        tracing::debug!(key = %key, "vertex array deleted");
        Some(entry.binding.handle)
    }

    pub fn uses(&self, key: &ContentKey) -> usize {
        self.entries.get(key).map_or(0, |e| e.uses)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// A logical draw source. Several may share one physical vertex array.
#[derive(Debug)]
pub struct VertexArray {
    label: String,
    binding: Option<VertexArrayBinding>,
}

impl VertexArray {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            binding: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn binding(&self) -> Option<&VertexArrayBinding> {
        self.binding.as_ref()
    }

    /// Point this vertex array at `vertices`/`indices`. Data identical to what
    /// is already held is a no-op; anything else releases the old binding
    /// first.
    pub fn set_data(&mut self, gpu: &mut GpuContext, vertices: &VertexData, indices: Option<&IndexData>) {
        let key = VertexArrayCache::key_for(vertices, indices);
        if self.binding.as_ref().is_some_and(|b| b.key == key) {
            return;
        }
        self.free(gpu);
        self.binding = Some(gpu.acquire_vertex_array(key, &self.label, vertices, indices));
    }

    /// Release this holder's use. Safe to call repeatedly.
    pub fn free(&mut self, gpu: &mut GpuContext) {
        if let Some(binding) = self.binding.take() {
            gpu.release_vertex_array(binding.key);
        }
    }

    pub fn draw(&self, gpu: &mut GpuContext) -> Result<(), GpuError> {
        let binding = self
            .binding
            .as_ref()
            .ok_or_else(|| GpuError::VertexArrayNotLoaded(self.label.clone()))?;
        gpu.bind_vertex_array(Some(binding.handle));
        gpu.draw(binding.topology, binding.draw_count(), binding.index_count.is_some());
        Ok(())
    }
}

impl Drop for VertexArray {
    fn drop(&mut self) {
        if self.binding.is_some() {
            tracing::warn!(label = %self.label, "vertex array dropped without free; GPU object leaked");
        }
    }
}
