//! The standard pipelines.

mod deferred;
mod forward;
mod screen;
mod shadow;

pub use deferred::DeferredPipeline;
pub use forward::ForwardPipeline;
pub use screen::ScreenPipeline;
pub use shadow::ShadowPipeline;

use crate::RenderError;
use glam::Mat4;
use kiln_common::ObjectId;
use kiln_gpu::{GpuContext, Shader, UniformValue};
use kiln_scene::{BlendMode, Capabilities, Material, MeshComponent, SceneContext};

/// Renderable meshes whose material uses `blend`, in id order.
pub(crate) fn meshes_with_blend(scene: &SceneContext, blend: BlendMode) -> Vec<ObjectId> {
    scene
        .iter_capable(Capabilities::RENDERABLE)
        .filter_map(|(id, object)| {
            let mesh = object.as_any().downcast_ref::<MeshComponent>()?;
            let material = scene.get_as::<Material>(mesh.material())?;
            (material.blend() == blend).then_some(id)
        })
        .collect()
}

/// Draw one mesh with its own material.
pub(crate) fn draw_with_material(
    gpu: &mut GpuContext,
    scene: &SceneContext,
    mesh: ObjectId,
    view_proj: Mat4,
) -> Result<bool, RenderError> {
    let Some(component) = scene.get_as::<MeshComponent>(mesh) else {
        return Ok(false);
    };
    let Some(material) = scene.get_as::<Material>(component.material()) else {
        tracing::warn!(%mesh, material = %component.material(), "mesh material is gone; skipped");
        return Ok(false);
    };
    set_if_exposed(material.shader(), "u_model", scene.world_matrix(mesh));
    set_if_exposed(material.shader(), "u_view_proj", view_proj);
    material.bind(gpu)?;
    component.draw(gpu)?;
    Ok(true)
}

/// Materials bring their own shaders, which need not declare every
/// per-draw uniform.
fn set_if_exposed(shader: &Shader, name: &str, value: impl Into<UniformValue>) {
    if shader.location(name).is_ok() {
        shader.set_uniform(name, value);
    }
}
