use crate::impl_as_any;
use crate::object::{FrameInfo, SceneObject};
use glam::{Mat4, Vec3};
use kiln_common::{ObjectId, Transform};
use std::fmt;

/// Per-frame behaviour attached to an actor. Runs during `update_frame` and
/// may move the actor.
pub type ActorScript = Box<dyn FnMut(&mut Transform, &FrameInfo) + Send>;

/// A named scene-graph node. Owns its components and child actors.
pub struct Actor {
    name: String,
    pub(crate) transform: Transform,
    pub(crate) world: Mat4,
    pub(crate) parent: Option<ObjectId>,
    pub(crate) children: Vec<ObjectId>,
    pub(crate) components: Vec<ObjectId>,
    pub(crate) transform_dirty: bool,
    pub(crate) subtree_dirty: bool,
    script: Option<ActorScript>,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Transform::default(),
            world: Mat4::IDENTITY,
            parent: None,
            children: Vec::new(),
            components: Vec::new(),
            transform_dirty: true,
            subtree_dirty: false,
            script: None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_script(mut self, script: impl FnMut(&mut Transform, &FrameInfo) + Send + 'static) -> Self {
        self.script = Some(Box::new(script));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Takes effect in the world matrix at the next update frame.
    pub fn set_transform(&mut self, transform: Transform) {
        if self.transform != transform {
            self.transform = transform;
            self.transform_dirty = true;
        }
    }

    /// Local-to-world matrix as of the last update frame.
    pub fn world_matrix(&self) -> Mat4 {
        self.world
    }

    pub fn world_position(&self) -> Vec3 {
        self.world.transform_point3(Vec3::ZERO)
    }

    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    pub fn components(&self) -> &[ObjectId] {
        &self.components
    }

    pub fn is_dirty(&self) -> bool {
        self.transform_dirty
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.name)
            .field("transform", &self.transform)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("components", &self.components)
            .field("scripted", &self.script.is_some())
            .finish()
    }
}

impl SceneObject for Actor {
    fn type_name(&self) -> &'static str {
        "Actor"
    }

    fn update_frame(&mut self, frame: &FrameInfo) {
        if let Some(script) = self.script.as_mut() {
            let before = self.transform;
            script(&mut self.transform, frame);
            if self.transform != before {
                self.transform_dirty = true;
            }
        }
    }

    impl_as_any!();
}
