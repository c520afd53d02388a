use crate::backend::{GraphicsBackend, TextureDesc, TextureHandle};

/// Generational reference to a registry slot. Behaves like a weak reference:
/// once the texture is freed the slot's generation moves on and the id stops
/// resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId {
    index: u32,
    generation: u32,
}

impl TextureId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone)]
pub struct TextureRecord {
    pub handle: TextureHandle,
    pub desc: TextureDesc,
    holders: u32,
    orphaned: bool,
}

impl TextureRecord {
    pub fn is_orphaned(&self) -> bool {
        self.orphaned
    }

    /// Owners still holding a claim on the texture.
    pub fn holders(&self) -> u32 {
        self.holders
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    record: Option<TextureRecord>,
}

/// Dense table of every live GPU texture.
///
/// Every owner holds a claim on the textures it uses. A new texture carries
/// one claim for its creator; further owners [`retain`](Self::retain) it.
/// When the last claim is released the texture is orphaned, and it is deleted
/// on the GPU only by the next [`sweep`](Self::sweep).
#[derive(Debug, Default)]
pub struct TextureRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    freed_total: u64,
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, handle: TextureHandle, desc: TextureDesc) -> TextureId {
        let record = TextureRecord {
            handle,
            desc,
            holders: 1,
            orphaned: false,
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.record = Some(record);
                TextureId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    record: Some(record),
                });
                TextureId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Resolve an id, `None` once the texture has been freed.
    pub fn get(&self, id: TextureId) -> Option<&TextureRecord> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.record.as_ref())
    }

    fn get_mut(&mut self, id: TextureId) -> Option<&mut TextureRecord> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.record.as_mut())
    }

    pub fn is_alive(&self, id: TextureId) -> bool {
        self.get(id).is_some()
    }

    pub fn handle(&self, id: TextureId) -> Option<TextureHandle> {
        self.get(id).map(|r| r.handle)
    }

    /// `None` for dead ids.
    pub fn is_orphaned(&self, id: TextureId) -> Option<bool> {
        self.get(id).map(|r| r.orphaned)
    }

    /// Add a claim. Also takes back an orphaned texture the sweep has not
    /// reached yet. Returns `false` for dead ids.
    pub fn retain(&mut self, id: TextureId) -> bool {
        match self.get_mut(id) {
            Some(record) => {
                record.holders += 1;
                record.orphaned = false;
                true
            }
            None => false,
        }
    }

    /// Drop a claim; the texture is orphaned once none remain. Returns
    /// `false` for dead ids.
    pub fn release(&mut self, id: TextureId) -> bool {
        match self.get_mut(id) {
            Some(record) => {
                record.holders = record.holders.saturating_sub(1);
                if record.holders == 0 {
                    record.orphaned = true;
                }
                true
            }
            None => false,
        }
    }

    /// Delete every orphaned texture on the GPU and retire its slot.
    pub(crate) fn sweep(&mut self, backend: &mut dyn GraphicsBackend) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let orphaned = slot.record.as_ref().is_some_and(|r| r.orphaned);
            if !orphaned {
                continue;
            }
            if let Some(record) = slot.record.take() {
                backend.delete_texture(record.handle);
                tracing::trace!(index, label = %record.desc.label, "texture freed");
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            freed += 1;
        }
        self.freed_total += freed as u64;
        freed
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.record.is_some()).count()
    }

    pub fn orphaned_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.record.as_ref().is_some_and(|r| r.orphaned))
            .count()
    }

    /// Textures freed by all sweeps so far.
    pub fn freed_total(&self) -> u64 {
        self.freed_total
    }

    pub fn iter(&self) -> impl Iterator<Item = (TextureId, &TextureRecord)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.record.as_ref().map(|record| {
                (
                    TextureId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    record,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TextureFormat;
    use crate::headless::HeadlessBackend;

    fn desc(label: &str) -> TextureDesc {
        TextureDesc::new_2d(label, 4, 4, TextureFormat::Rgba8)
    }

    #[test]
    fn orphan_is_freed_only_by_sweep() {
        let mut backend = HeadlessBackend::new();
        let stats = backend.stats();
        let mut registry = TextureRegistry::new();
        let handle = backend.create_texture(&desc("albedo"));
        let id = registry.insert(handle, desc("albedo"));

        assert!(registry.release(id));
        assert!(registry.is_alive(id));
        assert_eq!(registry.is_orphaned(id), Some(true));
        assert_eq!(stats.live_textures(), 1);

        assert_eq!(registry.sweep(&mut backend), 1);
        assert!(!registry.is_alive(id));
        assert_eq!(registry.is_orphaned(id), None);
        assert_eq!(stats.live_textures(), 0);
        assert_eq!(registry.freed_total(), 1);
    }

    #[test]
    fn sweep_ignores_live_textures() {
        let mut backend = HeadlessBackend::new();
        let mut registry = TextureRegistry::new();
        let a = registry.insert(backend.create_texture(&desc("a")), desc("a"));
        let b = registry.insert(backend.create_texture(&desc("b")), desc("b"));
        registry.release(b);
        assert_eq!(registry.orphaned_count(), 1);

        assert_eq!(registry.sweep(&mut backend), 1);
        assert!(registry.is_alive(a));
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.sweep(&mut backend), 0);
    }

    #[test]
    fn reused_slot_does_not_resolve_old_id() {
        let mut backend = HeadlessBackend::new();
        let mut registry = TextureRegistry::new();
        let old = registry.insert(backend.create_texture(&desc("a")), desc("a"));
        registry.release(old);
        registry.sweep(&mut backend);

        let new = registry.insert(backend.create_texture(&desc("b")), desc("b"));
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert!(registry.get(old).is_none());
        assert_eq!(registry.get(new).unwrap().desc.label, "b");
        assert!(!registry.release(old));
    }

    #[test]
    fn retain_cancels_orphaning() {
        let mut backend = HeadlessBackend::new();
        let mut registry = TextureRegistry::new();
        let id = registry.insert(backend.create_texture(&desc("a")), desc("a"));
        registry.release(id);
        assert!(registry.retain(id));
        assert_eq!(registry.sweep(&mut backend), 0);
        assert!(registry.is_alive(id));
    }

    #[test]
    fn orphaned_only_after_last_claim() {
        let mut backend = HeadlessBackend::new();
        let mut registry = TextureRegistry::new();
        let id = registry.insert(backend.create_texture(&desc("shared")), desc("shared"));
        assert!(registry.retain(id));
        assert_eq!(registry.get(id).unwrap().holders(), 2);

        registry.release(id);
        assert_eq!(registry.is_orphaned(id), Some(false));
        assert_eq!(registry.sweep(&mut backend), 0);

        registry.release(id);
        assert_eq!(registry.is_orphaned(id), Some(true));
        assert_eq!(registry.sweep(&mut backend), 1);
        assert!(!registry.retain(id));
    }
}
