use bitflags::bitflags;
use kiln_common::ObjectId;
use kiln_gpu::GpuContext;
use std::any::Any;

bitflags! {
    /// What a scene object takes part in. Read once at registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        const RENDERABLE = 1;
        const SHADOW_CASTER = 1 << 1;
        const LIGHT = 1 << 2;
    }
}

/// Timing for one update frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameInfo {
    pub frame: u64,
    /// Seconds since the previous frame.
    pub delta: f32,
    /// Seconds since the first frame.
    pub elapsed: f32,
}

impl FrameInfo {
    pub fn advance(self, delta: f32) -> Self {
        Self {
            frame: self.frame + 1,
            delta,
            elapsed: self.elapsed + delta,
        }
    }
}

/// Anything a [`SceneContext`](crate::SceneContext) tracks: actors,
/// components and the resources they share.
///
/// Only [`do_deallocation`](Self::do_deallocation) releases GPU resources,
/// and the scene calls it only from the synchronization point.
pub trait SceneObject: Any + Send {
    /// Short type name for diagnostics.
    fn type_name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    /// Objects this one references (not owns). The scene adds a
    /// [`EdgeKind::References`](crate::EdgeKind::References) edge to each when
    /// the object is inserted.
    fn references(&self) -> Vec<ObjectId> {
        Vec::new()
    }

    fn update_frame(&mut self, _frame: &FrameInfo) {}

    fn post_update(&mut self, _frame: &FrameInfo) {}

    fn on_screen_resize(&mut self, _width: u32, _height: u32) {}

    fn on_world_rendered(&mut self, _gpu: &mut GpuContext) {}

    fn do_deallocation(&mut self, _gpu: &mut GpuContext) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Implements the `as_any` pair of [`SceneObject`].
#[macro_export]
macro_rules! impl_as_any {
    () => {
        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
            self
        }
    };
}
