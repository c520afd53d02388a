use kiln_common::ObjectId;
use kiln_gpu::GpuContext;
use kiln_scene::{Capabilities, SceneContext};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::{self, Write as _};

/// Scene inspector for developer tooling.
///
/// Read-only queries against a scene and its GPU context for debugging and
/// frame diagnostics.
pub struct SceneInspector;

impl SceneInspector {
    /// Produce a summary of the scene and GPU resource state.
    pub fn summary(scene: &SceneContext, gpu: &GpuContext) -> InspectorSummary {
        let stats = gpu.stats();
        InspectorSummary {
            frame: scene.frame().frame,
            objects: scene.len(),
            actors: scene.actors().len(),
            pending: scene.lifecycle().pending_count(),
            vertex_arrays: stats.vertex_arrays,
            programs: stats.programs,
            live_textures: stats.live_textures,
            orphaned_textures: stats.orphaned_textures,
            freed_textures: stats.freed_textures,
        }
    }

    /// Lifecycle details of one object.
    pub fn inspect(scene: &SceneContext, id: ObjectId) -> Option<ObjectInfo> {
        let object = scene.get(id)?;
        let lifecycle = scene.lifecycle();
        Some(ObjectInfo {
            id,
            type_name: object.type_name(),
            name: scene.actor(id).map(|a| a.name().to_string()),
            capabilities: capability_names(scene.capabilities(id)),
            ref_count: lifecycle.ref_count(id).unwrap_or(0),
            consumers: lifecycle.consumers(id).into_iter().map(|(c, _)| c).collect(),
            pending: scene.is_pending(id),
        })
    }

    /// Textual dump of the actor hierarchy. With `list_children` each actor
    /// lists its child actors and components recursively, and each component
    /// the objects it references. Objects not reachable from the roots are
    /// listed at the end; peers that only reference each other show up there.
    pub fn dump_info(scene: &SceneContext, list_children: bool) -> String {
        let mut out = String::new();
        let mut seen = BTreeSet::new();
        let _ = writeln!(
            out,
            "scene: {} objects, {} pending, frame {}",
            scene.len(),
            scene.lifecycle().pending_count(),
            scene.frame().frame
        );
        for root in scene.roots() {
            dump_object(scene, *root, 1, list_children, &mut seen, &mut out);
        }
        if list_children {
            let detached: Vec<ObjectId> = scene.ids().filter(|id| !seen.contains(id)).collect();
            if !detached.is_empty() {
                let _ = writeln!(out, "detached:");
                for id in detached {
                    let _ = writeln!(out, "  {}", describe(scene, id));
                }
            }
        }
        out
    }
}

fn dump_object(
    scene: &SceneContext,
    id: ObjectId,
    depth: usize,
    list_children: bool,
    seen: &mut BTreeSet<ObjectId>,
    out: &mut String,
) {
    let indent = "  ".repeat(depth);
    if !seen.insert(id) {
        let _ = writeln!(out, "{indent}{id} (see above)");
        return;
    }
    let _ = writeln!(out, "{indent}{}", describe(scene, id));
    if !list_children {
        return;
    }
    if let Some(actor) = scene.actor(id) {
        for component in actor.components() {
            dump_object(scene, *component, depth + 1, true, seen, out);
        }
        for child in actor.children() {
            dump_object(scene, *child, depth + 1, true, seen, out);
        }
    } else if let Some(object) = scene.get(id) {
        for target in object.references() {
            if scene.contains(target) {
                dump_object(scene, target, depth + 1, true, seen, out);
            }
        }
    }
}

fn describe(scene: &SceneContext, id: ObjectId) -> String {
    let Some(info) = SceneInspector::inspect(scene, id) else {
        return format!("{id} <missing>");
    };
    let mut line = match &info.name {
        Some(name) => format!("{} {id} \"{name}\"", info.type_name),
        None => format!("{} {id}", info.type_name),
    };
    let _ = write!(line, " refs={}", info.ref_count);
    if !info.capabilities.is_empty() {
        let _ = write!(line, " [{}]", info.capabilities.join("|"));
    }
    if let Some(actor) = scene.actor(id) {
        let p = actor.world_position();
        let _ = write!(line, " pos=({:.2}, {:.2}, {:.2})", p.x, p.y, p.z);
    }
    if info.pending {
        line.push_str(" pending");
    }
    line
}

fn capability_names(caps: Capabilities) -> Vec<&'static str> {
    caps.iter_names().map(|(name, _)| name).collect()
}

/// Summary of scene and GPU state for the inspector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectorSummary {
    pub frame: u64,
    pub objects: usize,
    pub actors: usize,
    pub pending: usize,
    pub vertex_arrays: usize,
    pub programs: usize,
    pub live_textures: usize,
    pub orphaned_textures: usize,
    pub freed_textures: u64,
}

impl InspectorSummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for InspectorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scene: frame={} objects={} actors={} pending={} | GPU: vertex_arrays={} programs={} textures={} orphaned={}",
            self.frame,
            self.objects,
            self.actors,
            self.pending,
            self.vertex_arrays,
            self.programs,
            self.live_textures,
            self.orphaned_textures
        )
    }
}

/// Lifecycle details about a single object.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub type_name: &'static str,
    pub name: Option<String>,
    pub capabilities: Vec<&'static str>,
    pub ref_count: usize,
    pub consumers: Vec<ObjectId>,
    pub pending: bool,
}
