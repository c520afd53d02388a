use crate::SceneError;
use crate::actor::Actor;
use crate::lifecycle::{EdgeKind, Lifecycle};
use crate::object::{Capabilities, FrameInfo, SceneObject};
use crate::tasks::TaskQueue;
use glam::Mat4;
use kiln_common::ObjectId;
use kiln_gpu::GpuContext;
use std::collections::{BTreeMap, BTreeSet};

struct Entry {
    capabilities: Capabilities,
    object: Box<dyn SceneObject>,
}

/// What one update frame did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub tasks: usize,
    pub updated: usize,
    pub world_updates: usize,
}

/// What one synchronization point committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Finalized ids in finalization order.
    pub finalized: Vec<ObjectId>,
    pub actors: usize,
}

/// The live scene: every tracked object, the actor hierarchy and name index,
/// and the lifecycle ledger that decides when objects die.
pub struct SceneContext {
    lifecycle: Lifecycle,
    entries: BTreeMap<ObjectId, Entry>,
    roots: Vec<ObjectId>,
    names: BTreeMap<String, Vec<ObjectId>>,
    updater: TaskQueue<SceneContext>,
    frame: FrameInfo,
}

impl Default for SceneContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SceneContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneContext")
            .field("objects", &self.entries.len())
            .field("roots", &self.roots)
            .field("pending", &self.lifecycle.pending_count())
            .field("frame", &self.frame.frame)
            .finish()
    }
}

impl SceneContext {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            entries: BTreeMap::new(),
            roots: Vec::new(),
            names: BTreeMap::new(),
            updater: TaskQueue::new(),
            frame: FrameInfo::default(),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn dispatch_updater(&self, task: impl FnOnce(&mut SceneContext) + Send + 'static) {
        self.updater.dispatch(task);
    }

    pub fn frame(&self) -> FrameInfo {
        self.frame
    }

    // --- population ---

    /// Add a top-level actor, kept alive by the scene root.
    pub fn spawn_actor(&mut self, mut actor: Actor) -> ObjectId {
        let id = ObjectId::next();
        actor.parent = None;
        self.index_name(actor.name(), id);
        self.lifecycle.register(id);
        self.lifecycle.add_ref(id, ObjectId::ROOT, EdgeKind::Owns);
        self.entries.insert(id, entry(Box::new(actor)));
        self.roots.push(id);
        tracing::debug!(%id, "actor spawned");
        id
    }

    /// Add an actor owned by `parent`.
    pub fn spawn_child(&mut self, parent: ObjectId, mut actor: Actor) -> Result<ObjectId, SceneError> {
        self.require_actor(parent)?;
        let id = ObjectId::next();
        actor.parent = Some(parent);
        self.index_name(actor.name(), id);
        self.lifecycle.register(id);
        self.reference(id, parent, EdgeKind::Owns)?;
        self.entries.insert(id, entry(Box::new(actor)));
        if let Some(parent) = self.actor_mut(parent) {
            parent.children.push(id);
        }
        Ok(id)
    }

    /// Add a component owned by `actor`.
    pub fn attach(&mut self, actor: ObjectId, component: impl SceneObject) -> Result<ObjectId, SceneError> {
        self.require_actor(actor)?;
        let id = self.insert(component)?;
        self.reference(id, actor, EdgeKind::Owns)?;
        if let Some(actor) = self.actor_mut(actor) {
            actor.components.push(id);
        }
        Ok(id)
    }

    /// Track a free-standing object such as a shared material. It has no
    /// consumers until someone references it. Its declared references are
    /// recorded now.
    pub fn insert(&mut self, object: impl SceneObject) -> Result<ObjectId, SceneError> {
        let references = object.references();
        if let Some(missing) = references.iter().find(|r| !self.entries.contains_key(r)) {
            return Err(SceneError::ObjectNotFound(*missing));
        }
        let id = ObjectId::next();
        self.lifecycle.register(id);
        self.entries.insert(id, entry(Box::new(object)));
        for target in references {
            self.reference(target, id, EdgeKind::References)?;
        }
        Ok(id)
    }

    pub fn reference(&self, target: ObjectId, consumer: ObjectId, kind: EdgeKind) -> Result<(), SceneError> {
        if self.lifecycle.add_ref(target, consumer, kind) {
            Ok(())
        } else {
            Err(SceneError::ReferenceRefused { target, consumer })
        }
    }

    /// Drop `consumer`'s hold on `target`.
    pub fn release(&self, target: ObjectId, consumer: ObjectId) -> bool {
        self.lifecycle.remove_ref(target, consumer)
    }

    pub fn deallocate(&self, id: ObjectId) -> bool {
        self.lifecycle.deallocate(id)
    }

    /// Take an actor out of the hierarchy and the name index and release its
    /// owner's reference. Its resources go at the next synchronization point.
    pub fn remove_actor(&mut self, id: ObjectId) -> Result<(), SceneError> {
        let (parent, name) = {
            let actor = self.require_actor(id)?;
            (actor.parent, actor.name().to_string())
        };
        self.unindex_name(&name, id);
        match parent {
            Some(parent) => {
                if let Some(parent) = self.actor_mut(parent) {
                    parent.children.retain(|c| *c != id);
                }
                self.lifecycle.remove_ref(id, parent);
            }
            None => {
                self.roots.retain(|r| *r != id);
                self.lifecycle.remove_ref(id, ObjectId::ROOT);
            }
        }
        tracing::debug!(%id, name, "actor removed");
        Ok(())
    }

    /// Detach one component from its actor.
    pub fn remove_component(&mut self, actor: ObjectId, component: ObjectId) -> Result<bool, SceneError> {
        let owned = {
            let actor = self.require_actor_mut(actor)?;
            let before = actor.components.len();
            actor.components.retain(|c| *c != component);
            actor.components.len() != before
        };
        Ok(owned && self.lifecycle.remove_ref(component, actor))
    }

    // --- queries ---

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.entries.keys().copied()
    }

    pub fn get(&self, id: ObjectId) -> Option<&dyn SceneObject> {
        self.entries.get(&id).map(|e| e.object.as_ref())
    }

    pub fn get_as<T: SceneObject>(&self, id: ObjectId) -> Option<&T> {
        self.entries.get(&id)?.object.as_any().downcast_ref()
    }

    pub fn get_as_mut<T: SceneObject>(&mut self, id: ObjectId) -> Option<&mut T> {
        self.entries.get_mut(&id)?.object.as_any_mut().downcast_mut()
    }

    pub fn actor(&self, id: ObjectId) -> Option<&Actor> {
        self.get_as(id)
    }

    pub fn actor_mut(&mut self, id: ObjectId) -> Option<&mut Actor> {
        self.get_as_mut(id)
    }

    pub fn capabilities(&self, id: ObjectId) -> Capabilities {
        self.entries.get(&id).map_or(Capabilities::empty(), |e| e.capabilities)
    }

    /// Top-level actors in spawn order.
    pub fn roots(&self) -> &[ObjectId] {
        &self.roots
    }

    /// Every actor in the hierarchy, depth first.
    pub fn actors(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut stack: Vec<ObjectId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let Some(actor) = self.actor(id) {
                out.push(id);
                stack.extend(actor.children.iter().rev().copied());
            }
        }
        out
    }

    /// First actor with this name.
    pub fn find_actor(&self, name: &str) -> Option<ObjectId> {
        self.names.get(name).and_then(|ids| ids.first().copied())
    }

    /// Every actor with this name, in spawn order.
    pub fn find_actors(&self, name: &str) -> Vec<ObjectId> {
        self.names.get(name).cloned().unwrap_or_default()
    }

    pub fn owner_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.lifecycle.owner_of(id)
    }

    /// World matrix of an actor, or of the actor owning a component.
    pub fn world_matrix(&self, id: ObjectId) -> Mat4 {
        if let Some(actor) = self.actor(id) {
            return actor.world;
        }
        self.owner_of(id)
            .and_then(|owner| self.actor(owner))
            .map_or(Mat4::IDENTITY, |actor| actor.world)
    }

    pub fn is_pending(&self, id: ObjectId) -> bool {
        self.lifecycle.is_pending(id)
    }

    /// Objects declaring every capability in `caps`, in id order. Pending
    /// objects are skipped.
    pub fn iter_capable(&self, caps: Capabilities) -> impl Iterator<Item = (ObjectId, &dyn SceneObject)> + '_ {
        let pending: BTreeSet<ObjectId> = self.lifecycle.pending().into_iter().collect();
        self.entries
            .iter()
            .filter(move |(id, e)| e.capabilities.contains(caps) && !pending.contains(id))
            .map(|(id, e)| (*id, e.object.as_ref()))
    }

    /// Depth-first visit from `root` (the scene root visits every top-level
    /// actor). Descends into an object's dependencies only when `predicate`
    /// accepts it; `action` runs on every visited object of type `T`. Returns
    /// the number of `action` calls.
    pub fn visit<T: SceneObject>(
        &mut self,
        root: ObjectId,
        predicate: impl Fn(ObjectId, &dyn SceneObject) -> bool,
        mut action: impl FnMut(ObjectId, &mut T),
    ) -> usize {
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack: Vec<ObjectId> = if root.is_root() {
            self.roots.iter().rev().copied().collect()
        } else {
            vec![root]
        };
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            order.push(id);
            if predicate(id, entry.object.as_ref()) {
                stack.extend(self.lifecycle.dependencies(id).into_iter().rev());
            }
        }

        let mut visited = 0;
        for id in order {
            if let Some(target) = self.get_as_mut::<T>(id) {
                action(id, target);
                visited += 1;
            }
        }
        visited
    }

    /// Run `action` on every live object declaring `caps`.
    pub fn visit_capable(&mut self, caps: Capabilities, mut action: impl FnMut(ObjectId, &mut dyn SceneObject)) -> usize {
        let pending: BTreeSet<ObjectId> = self.lifecycle.pending().into_iter().collect();
        let mut visited = 0;
        for (id, entry) in self.entries.iter_mut() {
            if entry.capabilities.contains(caps) && !pending.contains(id) {
                action(*id, entry.object.as_mut());
                visited += 1;
            }
        }
        visited
    }

    // --- frame ---

    /// Update activity for one frame: queued tasks, `update_frame` on every
    /// live object, transform propagation up then down the hierarchy, then
    /// `post_update`.
    pub fn update_frame(&mut self, frame: &FrameInfo) -> UpdateReport {
        let _span = tracing::debug_span!("update_frame", frame = frame.frame).entered();
        let queue = self.updater.clone();
        let tasks = queue.run_all(self);

        let pending: BTreeSet<ObjectId> = self.lifecycle.pending().into_iter().collect();
        let mut updated = 0;
        for (id, entry) in self.entries.iter_mut() {
            if !pending.contains(id) {
                entry.object.update_frame(frame);
                updated += 1;
            }
        }

        let world_updates = self.propagate_transforms();

        for (id, entry) in self.entries.iter_mut() {
            if !pending.contains(id) {
                entry.object.post_update(frame);
            }
        }
        self.frame = *frame;
        UpdateReport {
            tasks,
            updated,
            world_updates,
        }
    }

    fn propagate_transforms(&mut self) -> usize {
        let dirty: Vec<ObjectId> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                e.object
                    .as_any()
                    .downcast_ref::<Actor>()
                    .is_some_and(Actor::is_dirty)
            })
            .map(|(id, _)| *id)
            .collect();

        // up: flag every ancestor of a moved actor
        for id in dirty {
            let mut cursor = self.actor(id).and_then(Actor::parent);
            while let Some(parent) = cursor {
                let Some(actor) = self.actor_mut(parent) else {
                    break;
                };
                if actor.subtree_dirty {
                    break;
                }
                actor.subtree_dirty = true;
                cursor = actor.parent;
            }
        }

        // down: recompute world matrices below moved actors
        let mut recomputed = 0;
        let mut stack: Vec<(ObjectId, Mat4, bool)> = self
            .roots
            .iter()
            .rev()
            .map(|id| (*id, Mat4::IDENTITY, false))
            .collect();
        while let Some((id, parent_world, forced)) = stack.pop() {
            let Some(actor) = self.actor_mut(id) else {
                continue;
            };
            let recompute = forced || actor.transform_dirty;
            if recompute {
                actor.world = parent_world * actor.transform.matrix();
                recomputed += 1;
            }
            let descend = recompute || actor.subtree_dirty;
            actor.transform_dirty = false;
            actor.subtree_dirty = false;
            if descend {
                let world = actor.world;
                stack.extend(actor.children.iter().rev().map(|c| (*c, world, recompute)));
            }
        }
        recomputed
    }

    /// Synchronization point: run the deallocation sweep, finalizing every
    /// unreachable object and releasing its GPU resources.
    pub fn sync(&mut self, gpu: &mut GpuContext) -> SyncReport {
        let _span = tracing::debug_span!("scene_sync").entered();
        let lifecycle = &self.lifecycle;
        let entries = &mut self.entries;
        let roots = &mut self.roots;
        let names = &mut self.names;
        let mut actors = 0;

        let finalized = lifecycle.sweep(|id| {
            let owner = lifecycle.owner_of(id);
            let Some(mut entry) = entries.remove(&id) else {
                return;
            };
            entry.object.do_deallocation(gpu);
            let type_name = entry.object.type_name();

            if let Some(actor) = entry.object.as_any().downcast_ref::<Actor>() {
                actors += 1;
                roots.retain(|r| *r != id);
                remove_name(names, actor.name(), id);
                if let Some(parent) = actor.parent {
                    if let Some(parent) = entries
                        .get_mut(&parent)
                        .and_then(|e| e.object.as_any_mut().downcast_mut::<Actor>())
                    {
                        parent.children.retain(|c| *c != id);
                    }
                }
            } else if let Some(owner) = owner.and_then(|o| {
                entries
                    .get_mut(&o)
                    .and_then(|e| e.object.as_any_mut().downcast_mut::<Actor>())
            }) {
                owner.components.retain(|c| *c != id);
            }
            tracing::trace!(%id, type_name, "finalized");
        });

        if !finalized.is_empty() {
            tracing::debug!(finalized = finalized.len(), actors, "deallocation sweep");
        }
        SyncReport { finalized, actors }
    }

    /// Objects pending deallocation are skipped, as in `update_frame`.
    pub fn broadcast_resize(&mut self, width: u32, height: u32) {
        for (id, entry) in self.entries.iter_mut() {
            if !self.lifecycle.is_pending(*id) {
                entry.object.on_screen_resize(width, height);
            }
        }
    }

    pub fn broadcast_world_rendered(&mut self, gpu: &mut GpuContext) {
        for (id, entry) in self.entries.iter_mut() {
            if !self.lifecycle.is_pending(*id) {
                entry.object.on_world_rendered(gpu);
            }
        }
    }

    /// Deallocate everything and run a final sweep. Returns the number of
    /// objects finalized.
    pub fn shutdown(&mut self, gpu: &mut GpuContext) -> usize {
        let _span = tracing::info_span!("scene_shutdown").entered();
        for id in self.entries.keys() {
            self.lifecycle.deallocate(*id);
        }
        let report = self.sync(gpu);
        self.roots.clear();
        self.names.clear();
        if !self.entries.is_empty() {
            tracing::warn!(remaining = self.entries.len(), "objects survived scene shutdown");
        }
        report.finalized.len()
    }

    fn require_actor(&self, id: ObjectId) -> Result<&Actor, SceneError> {
        let entry = self.entries.get(&id).ok_or(SceneError::ObjectNotFound(id))?;
        entry
            .object
            .as_any()
            .downcast_ref()
            .ok_or(SceneError::NotAnActor(id))
    }

    fn require_actor_mut(&mut self, id: ObjectId) -> Result<&mut Actor, SceneError> {
        let entry = self.entries.get_mut(&id).ok_or(SceneError::ObjectNotFound(id))?;
        entry
            .object
            .as_any_mut()
            .downcast_mut()
            .ok_or(SceneError::NotAnActor(id))
    }

    fn index_name(&mut self, name: &str, id: ObjectId) {
        self.names.entry(name.to_string()).or_default().push(id);
    }

    fn unindex_name(&mut self, name: &str, id: ObjectId) {
        remove_name(&mut self.names, name, id);
    }
}

fn entry(object: Box<dyn SceneObject>) -> Entry {
    Entry {
        capabilities: object.capabilities(),
        object,
    }
}

fn remove_name(names: &mut BTreeMap<String, Vec<ObjectId>>, name: &str, id: ObjectId) {
    if let Some(ids) = names.get_mut(name) {
        ids.retain(|i| *i != id);
        if ids.is_empty() {
            names.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{LightComponent, Material, MeshComponent, ShadowSlots};
    use crate::impl_as_any;
    use glam::Vec3;
    use kiln_assets::MemoryAssets;
    use kiln_common::Transform;
    use kiln_gpu::{HeadlessBackend, HeadlessStats, ShaderDesc, ShaderStage, TextureDesc, TextureFormat, cube};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gpu() -> (GpuContext, HeadlessStats) {
        let assets = MemoryAssets::new()
            .with("m.vert", "uniform mat4 u_model;\nvoid main() {}")
            .with("m.frag", "uniform sampler2D u_albedo;\nvoid main() {}");
        let backend = HeadlessBackend::new();
        let stats = backend.stats();
        (GpuContext::new(Box::new(backend), Arc::new(assets)), stats)
    }

    fn desc() -> ShaderDesc {
        ShaderDesc::new("m")
            .stage(ShaderStage::Vertex, "m.vert")
            .stage(ShaderStage::Fragment, "m.frag")
    }

    /// Counts its own finalizations.
    struct Tally(Arc<AtomicUsize>);

    impl SceneObject for Tally {
        fn type_name(&self) -> &'static str {
            "Tally"
        }

        fn do_deallocation(&mut self, _gpu: &mut GpuContext) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        impl_as_any!();
    }

    #[test]
    fn name_lookup_returns_first_and_all() {
        let mut scene = SceneContext::new();
        let a = scene.spawn_actor(Actor::new("crate"));
        let b = scene.spawn_actor(Actor::new("crate"));
        scene.spawn_actor(Actor::new("lamp"));
        assert_eq!(scene.find_actor("crate"), Some(a));
        assert_eq!(scene.find_actors("crate"), vec![a, b]);
        assert_eq!(scene.find_actor("missing"), None);

        scene.remove_actor(a).unwrap();
        assert_eq!(scene.find_actor("crate"), Some(b));
    }

    #[test]
    fn removed_actor_survives_until_sync() {
        let (mut gpu, _) = gpu();
        let mut scene = SceneContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        let actor = scene.spawn_actor(Actor::new("a"));
        let tally = scene.attach(actor, Tally(count.clone())).unwrap();

        scene.remove_actor(actor).unwrap();
        assert!(scene.contains(actor));
        assert!(scene.is_pending(actor));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let report = scene.sync(&mut gpu);
        assert_eq!(report.actors, 1);
        assert_eq!(report.finalized.len(), 2);
        assert!(!scene.contains(actor));
        assert!(!scene.contains(tally));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(scene.roots().is_empty());
    }

    /// Counts screen resizes and finished frames.
    struct Listener(Arc<AtomicUsize>);

    impl SceneObject for Listener {
        fn type_name(&self) -> &'static str {
            "Listener"
        }

        fn on_screen_resize(&mut self, _width: u32, _height: u32) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn on_world_rendered(&mut self, _gpu: &mut GpuContext) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        impl_as_any!();
    }

    #[test]
    fn broadcasts_skip_pending_objects() {
        let (mut gpu, _) = gpu();
        let mut scene = SceneContext::new();
        let live = Arc::new(AtomicUsize::new(0));
        let doomed = Arc::new(AtomicUsize::new(0));
        let holder = scene.spawn_actor(Actor::new("holder"));
        scene.attach(holder, Listener(live.clone())).unwrap();
        let released = scene.insert(Listener(doomed.clone())).unwrap();
        scene.reference(released, holder, EdgeKind::References).unwrap();
        scene.release(released, holder);
        assert!(scene.is_pending(released));

        scene.broadcast_resize(640, 480);
        scene.broadcast_world_rendered(&mut gpu);
        assert_eq!(live.load(Ordering::SeqCst), 2);
        assert_eq!(doomed.load(Ordering::SeqCst), 0);
        scene.shutdown(&mut gpu);
    }

    #[test]
    fn removed_component_leaves_capability_queries() {
        let (mut gpu, _) = gpu();
        let mut scene = SceneContext::new();
        let material = scene.insert(Material::new(&mut gpu, "m", desc()).unwrap()).unwrap();
        let actor = scene.spawn_actor(Actor::new("a"));
        let (vertices, indices) = cube().unwrap();
        let mesh = scene
            .attach(actor, MeshComponent::new(&mut gpu, "cube", &vertices, Some(&indices), material))
            .unwrap();
        assert_eq!(scene.visit_capable(Capabilities::RENDERABLE, |id, _| assert_eq!(id, mesh)), 1);

        assert!(scene.remove_component(actor, mesh).unwrap());
        assert!(!scene.remove_component(actor, mesh).unwrap());
        assert_eq!(scene.visit_capable(Capabilities::RENDERABLE, |_, _| {}), 0);

        let report = scene.sync(&mut gpu);
        assert_eq!(report.finalized, vec![mesh, material]);
        assert!(scene.actor(actor).unwrap().components().is_empty());
        scene.shutdown(&mut gpu);
    }

    #[test]
    fn resurrected_object_is_never_finalized() {
        let (mut gpu, _) = gpu();
        let mut scene = SceneContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        let holder = scene.spawn_actor(Actor::new("holder"));
        let tally = scene.insert(Tally(count.clone())).unwrap();
        scene.reference(tally, holder, EdgeKind::References).unwrap();
        scene.release(tally, holder);
        assert!(scene.is_pending(tally));
        scene.reference(tally, holder, EdgeKind::References).unwrap();

        scene.sync(&mut gpu);
        assert!(scene.contains(tally));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn children_die_with_parent() {
        let (mut gpu, _) = gpu();
        let mut scene = SceneContext::new();
        let parent = scene.spawn_actor(Actor::new("parent"));
        let child = scene.spawn_child(parent, Actor::new("child")).unwrap();
        let grandchild = scene.spawn_child(child, Actor::new("grandchild")).unwrap();
        assert_eq!(scene.actors(), vec![parent, child, grandchild]);

        scene.remove_actor(parent).unwrap();
        let report = scene.sync(&mut gpu);
        assert_eq!(report.actors, 3);
        assert!(scene.is_empty());
        assert_eq!(scene.find_actor("grandchild"), None);
    }

    #[test]
    fn removing_child_updates_parent() {
        let (mut gpu, _) = gpu();
        let mut scene = SceneContext::new();
        let parent = scene.spawn_actor(Actor::new("parent"));
        let child = scene.spawn_child(parent, Actor::new("child")).unwrap();
        scene.remove_actor(child).unwrap();
        assert!(scene.actor(parent).unwrap().children().is_empty());
        scene.sync(&mut gpu);
        assert!(!scene.contains(child));
        assert!(scene.contains(parent));
    }

    #[test]
    fn attach_requires_an_actor() {
        let mut scene = SceneContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        let tally = scene.insert(Tally(count.clone())).unwrap();
        assert!(matches!(
            scene.attach(tally, Tally(count.clone())),
            Err(SceneError::NotAnActor(_))
        ));
        assert!(matches!(
            scene.attach(ObjectId(u64::MAX), Tally(count)),
            Err(SceneError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn transforms_propagate_down_the_hierarchy() {
        let mut scene = SceneContext::new();
        let parent = scene.spawn_actor(Actor::new("parent").with_transform(Transform::from_position(Vec3::X)));
        let child = scene
            .spawn_child(parent, Actor::new("child").with_transform(Transform::from_position(Vec3::Y)))
            .unwrap();

        let report = scene.update_frame(&FrameInfo::default());
        assert_eq!(report.world_updates, 2);
        assert_eq!(scene.actor(child).unwrap().world_position(), Vec3::new(1.0, 1.0, 0.0));

        let report = scene.update_frame(&FrameInfo::default().advance(0.016));
        assert_eq!(report.world_updates, 0);

        scene
            .actor_mut(parent)
            .unwrap()
            .set_transform(Transform::from_position(Vec3::Z));
        let report = scene.update_frame(&FrameInfo::default());
        assert_eq!(report.world_updates, 2);
        assert_eq!(scene.actor(child).unwrap().world_position(), Vec3::new(0.0, 1.0, 1.0));
    }

    #[test]
    fn moving_a_child_leaves_siblings_alone() {
        let mut scene = SceneContext::new();
        let parent = scene.spawn_actor(Actor::new("parent"));
        let a = scene.spawn_child(parent, Actor::new("a")).unwrap();
        scene.spawn_child(parent, Actor::new("b")).unwrap();
        scene.update_frame(&FrameInfo::default());

        scene.actor_mut(a).unwrap().set_transform(Transform::from_position(Vec3::X));
        let report = scene.update_frame(&FrameInfo::default());
        assert_eq!(report.world_updates, 1);
    }

    #[test]
    fn update_tasks_run_first() {
        let mut scene = SceneContext::new();
        scene.dispatch_updater(|s| {
            s.spawn_actor(Actor::new("from-task").with_transform(Transform::from_position(Vec3::X)));
        });
        let report = scene.update_frame(&FrameInfo::default());
        assert_eq!(report.tasks, 1);
        let id = scene.find_actor("from-task").unwrap();
        assert_eq!(scene.actor(id).unwrap().world_position(), Vec3::X);
    }

    #[test]
    fn scripts_run_before_propagation() {
        let mut scene = SceneContext::new();
        let id = scene.spawn_actor(Actor::new("mover").with_script(|t, f| t.position.x += f.delta));
        scene.update_frame(&FrameInfo::default().advance(1.0));
        assert_eq!(scene.actor(id).unwrap().world_position(), Vec3::X);
    }

    #[test]
    fn visit_filters_by_type_and_predicate() {
        let (mut gpu, _) = gpu();
        let mut scene = SceneContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        let a = scene.spawn_actor(Actor::new("a"));
        scene.attach(a, Tally(count.clone())).unwrap();
        let b = scene.spawn_child(a, Actor::new("b")).unwrap();
        scene.attach(b, Tally(count.clone())).unwrap();

        let mut names = Vec::new();
        let visited = scene.visit::<Actor>(ObjectId::ROOT, |_, _| true, |_, actor| names.push(actor.name().to_string()));
        assert_eq!(visited, 2);
        assert_eq!(names, vec!["a", "b"]);

        let tallies = scene.visit::<Tally>(a, |_, _| true, |_, _| {});
        assert_eq!(tallies, 2);
        let shallow = scene.visit::<Tally>(a, |id, _| id == a, |_, _| {});
        assert_eq!(shallow, 1);
        scene.shutdown(&mut gpu);
    }

    #[test]
    fn capability_queries_skip_pending_objects() {
        let (mut gpu, _) = gpu();
        let mut scene = SceneContext::new();
        let slots = Arc::new(ShadowSlots::new(1, 1));
        let a = scene.spawn_actor(Actor::new("sun"));
        let light = scene
            .attach(a, LightComponent::directional(Vec3::NEG_Y, Vec3::ONE, 1.0).with_shadow(&slots).unwrap())
            .unwrap();
        assert_eq!(scene.iter_capable(Capabilities::LIGHT).count(), 1);
        assert_eq!(scene.capabilities(light), Capabilities::LIGHT | Capabilities::SHADOW_CASTER);

        scene.deallocate(light);
        assert_eq!(scene.iter_capable(Capabilities::LIGHT).count(), 0);
        assert_eq!(slots.allocator(crate::LightKind::Directional).used_count(), 1);
        scene.sync(&mut gpu);
        assert_eq!(slots.allocator(crate::LightKind::Directional).used_count(), 0);
        assert!(scene.contains(a));
        assert!(scene.actor(a).unwrap().components().is_empty());
    }

    #[test]
    fn end_to_end_teardown_over_one_sync_point() {
        let (mut gpu, stats) = gpu();
        let mut scene = SceneContext::new();

        let texture = gpu.create_texture(TextureDesc::new_2d("albedo", 4, 4, TextureFormat::Rgba8));
        let material = scene
            .insert(
                Material::new(&mut gpu, "brick", desc())
                    .unwrap()
                    .with_texture(&mut gpu, "u_albedo", texture)
                    .unwrap(),
            )
            .unwrap();
        gpu.release_texture(texture);
        let actor = scene.spawn_actor(Actor::new("A"));
        let (vertices, indices) = cube().unwrap();
        let mesh = scene
            .attach(actor, MeshComponent::new(&mut gpu, "cube", &vertices, Some(&indices), material))
            .unwrap();
        assert_eq!(scene.lifecycle().ref_count(material), Some(1));
        assert_eq!(scene.owner_of(mesh), Some(actor));

        scene.remove_actor(actor).unwrap();
        assert_eq!(gpu.textures().is_orphaned(texture), Some(false));
        assert!(gpu.textures().is_alive(texture));

        let report = scene.sync(&mut gpu);
        gpu.sweep_textures();
        assert_eq!(report.finalized, vec![actor, mesh, material]);
        assert!(scene.is_empty());
        assert!(gpu.vertex_arrays().is_empty());
        assert!(gpu.shaders().is_empty());
        assert!(!gpu.textures().is_alive(texture));
        assert_eq!(stats.live_textures(), 0);
        assert_eq!(stats.live_programs(), 0);
        assert_eq!(stats.live_vertex_arrays(), 0);
        assert_eq!(stats.double_deletes(), 0);
        assert!(scene.lifecycle().is_empty());
    }

    #[test]
    fn texture_shared_by_two_materials_survives_one_teardown() {
        let (mut gpu, stats) = gpu();
        let mut scene = SceneContext::new();
        let texture = gpu.create_texture(TextureDesc::new_2d("albedo", 4, 4, TextureFormat::Rgba8));
        let (vertices, indices) = cube().unwrap();

        let mut actors = Vec::new();
        let mut materials = Vec::new();
        for name in ["A", "B"] {
            let material = Material::new(&mut gpu, name, desc())
                .unwrap()
                .with_texture(&mut gpu, "u_albedo", texture)
                .unwrap();
            let material = scene.insert(material).unwrap();
            let actor = scene.spawn_actor(Actor::new(name));
            scene
                .attach(actor, MeshComponent::new(&mut gpu, "cube", &vertices, Some(&indices), material))
                .unwrap();
            actors.push(actor);
            materials.push(material);
        }
        gpu.release_texture(texture);

        scene.remove_actor(actors[0]).unwrap();
        scene.sync(&mut gpu);
        assert_eq!(gpu.sweep_textures(), 0);
        assert!(!scene.contains(materials[0]));
        let survivor = scene.get_as::<Material>(materials[1]).unwrap();
        survivor.bind(&mut gpu).unwrap();

        scene.remove_actor(actors[1]).unwrap();
        scene.sync(&mut gpu);
        assert_eq!(gpu.sweep_textures(), 1);
        assert_eq!(stats.live_textures(), 0);
    }

    #[test]
    fn shared_material_outlives_one_mesh() {
        let (mut gpu, stats) = gpu();
        let mut scene = SceneContext::new();
        let material = scene.insert(Material::new(&mut gpu, "shared", desc()).unwrap()).unwrap();
        let (vertices, indices) = cube().unwrap();
        let a = scene.spawn_actor(Actor::new("a"));
        let b = scene.spawn_actor(Actor::new("b"));
        scene
            .attach(a, MeshComponent::new(&mut gpu, "cube", &vertices, Some(&indices), material))
            .unwrap();
        scene
            .attach(b, MeshComponent::new(&mut gpu, "cube", &vertices, Some(&indices), material))
            .unwrap();
        assert_eq!(stats.live_vertex_arrays(), 1);

        scene.remove_actor(a).unwrap();
        scene.sync(&mut gpu);
        assert!(scene.contains(material));
        assert_eq!(stats.live_vertex_arrays(), 1);
        assert_eq!(stats.live_programs(), 1);

        scene.remove_actor(b).unwrap();
        scene.sync(&mut gpu);
        assert!(!scene.contains(material));
        assert_eq!(stats.live_vertex_arrays(), 0);
        assert_eq!(stats.live_programs(), 0);
    }

    #[test]
    fn shutdown_finalizes_everything() {
        let (mut gpu, _) = gpu();
        let mut scene = SceneContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        let a = scene.spawn_actor(Actor::new("a"));
        scene.attach(a, Tally(count.clone())).unwrap();
        scene.insert(Tally(count.clone())).unwrap();
        assert_eq!(scene.shutdown(&mut gpu), 3);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(scene.is_empty());
    }
}
