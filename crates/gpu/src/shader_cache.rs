use crate::backend::GraphicsBackend;
use crate::hash::ContentKey;
use crate::shader::{CompiledProgram, Shader, ShaderInner};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

#[derive(Debug)]
struct Entry {
    program: Arc<CompiledProgram>,
    uses: usize,
}

/// Linked programs keyed by their preprocessed sources, plus weak tracking of
/// every compiled [`Shader`] for hot reload.
#[derive(Debug, Default)]
pub struct ShaderCache {
    entries: HashMap<ContentKey, Entry>,
    tracked: Vec<Weak<ShaderInner>>,
    hits: u64,
    misses: u64,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take another use of a cached program.
    pub(crate) fn adopt(&mut self, key: &ContentKey) -> Option<Arc<CompiledProgram>> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.uses += 1;
                self.hits += 1;
                Some(entry.program.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a freshly linked program. When an identical program is already
    /// cached the fresh one is deleted and the cached one adopted instead.
    pub(crate) fn insert_or_adopt(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        program: CompiledProgram,
    ) -> Arc<CompiledProgram> {
        if let Some(entry) = self.entries.get_mut(program.key()) {
            entry.uses += 1;
            program.destroy(backend);
            return entry.program.clone();
        }
        let key = *program.key();
        let program = Arc::new(program);
        self.entries.insert(
            key,
            Entry {
                program: program.clone(),
                uses: 1,
            },
        );
        program
    }

    /// Drop one use. The program is deleted on the GPU with its last use and
    /// its handle returned.
    pub(crate) fn release(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        key: &ContentKey,
    ) -> Option<Arc<CompiledProgram>> {
        let entry = self.entries.get_mut(key)?;
        entry.uses -= 1;
        if entry.uses > 0 {
            return None;
        }
        let entry = self.entries.remove(key)?;
        entry.program.destroy(backend);
        Some(entry.program)
    }

    pub(crate) fn track(&mut self, shader: &Arc<ShaderInner>) {
        if !self.tracked.iter().any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(shader))) {
            self.tracked.push(Arc::downgrade(shader));
        }
    }

    /// Every tracked shader that is still alive. Dead references are pruned.
    pub fn live_shaders(&mut self) -> Vec<Shader> {
        self.tracked.retain(|w| w.strong_count() > 0);
        self.tracked
            .iter()
            .filter_map(Weak::upgrade)
            .map(Shader::from_inner)
            .collect()
    }

    pub fn uses(&self, key: &ContentKey) -> usize {
        self.entries.get(key).map_or(0, |e| e.uses)
    }

    pub fn contains(&self, key: &ContentKey) -> bool {
        self.entries.contains_key(key)
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
