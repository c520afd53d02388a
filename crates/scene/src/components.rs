use crate::impl_as_any;
use crate::object::{Capabilities, SceneObject};
use glam::{Mat4, Vec3};
use kiln_common::{ObjectId, SlotAllocator, SlotError};
use kiln_gpu::{GpuContext, GpuError, IndexData, Shader, ShaderDesc, TextureId, UniformValue, VertexArray, VertexData};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Drawn into the g-buffer by the deferred pipeline.
    #[default]
    Opaque,
    /// Drawn by the forward pipeline on top of the lit image.
    Transparent,
}

/// A shader instance plus the textures and uniform values it draws with.
/// Holds a claim on each of its textures and drops them when deallocated.
#[derive(Debug)]
pub struct Material {
    name: String,
    shader: Shader,
    textures: Vec<(String, TextureId)>,
    values: BTreeMap<String, UniformValue>,
    blend: BlendMode,
}

impl Material {
    /// Compile `desc` (or adopt the cached program for it).
    pub fn new(gpu: &mut GpuContext, name: impl Into<String>, desc: ShaderDesc) -> Result<Self, GpuError> {
        let shader = Shader::new(desc);
        shader.compile(gpu)?;
        Ok(Self {
            name: name.into(),
            shader,
            textures: Vec::new(),
            values: BTreeMap::new(),
            blend: BlendMode::Opaque,
        })
    }

    /// Draw with the same program as `shader`. The material gets its own
    /// instance, which adopts the cached program.
    pub fn with_shader(gpu: &mut GpuContext, name: impl Into<String>, shader: &Shader) -> Result<Self, GpuError> {
        Self::new(gpu, name, shader.desc().clone())
    }

    /// Bind `texture` to the sampler uniform `sampler` and claim it. Texture
    /// units follow insertion order.
    pub fn with_texture(
        mut self,
        gpu: &mut GpuContext,
        sampler: impl Into<String>,
        texture: TextureId,
    ) -> Result<Self, GpuError> {
        gpu.retain_texture(texture)?;
        self.textures.push((sampler.into(), texture));
        Ok(self)
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shader(&self) -> &Shader {
        &self.shader
    }

    pub fn textures(&self) -> &[(String, TextureId)] {
        &self.textures
    }

    pub fn blend(&self) -> BlendMode {
        self.blend
    }

    /// Bind textures, push uniform values and make the shader current.
    pub fn bind(&self, gpu: &mut GpuContext) -> Result<(), GpuError> {
        for (unit, (sampler, texture)) in self.textures.iter().enumerate() {
            gpu.bind_texture(unit as u32, *texture)?;
            self.shader.set_uniform(sampler.clone(), unit as i32);
        }
        for (name, value) in &self.values {
            self.shader.set_uniform(name.clone(), *value);
        }
        self.shader.bind(gpu)
    }
}

impl SceneObject for Material {
    fn type_name(&self) -> &'static str {
        "Material"
    }

    fn do_deallocation(&mut self, gpu: &mut GpuContext) {
        self.shader.release(gpu);
        for (_, texture) in self.textures.drain(..) {
            gpu.release_texture(texture);
        }
    }

    impl_as_any!();
}

/// Geometry drawn with a material. References the material; the vertex array
/// may be shared with other meshes through the cache.
#[derive(Debug)]
pub struct MeshComponent {
    vertex_array: VertexArray,
    material: ObjectId,
    cast_shadows: bool,
}

impl MeshComponent {
    pub fn new(
        gpu: &mut GpuContext,
        label: impl Into<String>,
        vertices: &VertexData,
        indices: Option<&IndexData>,
        material: ObjectId,
    ) -> Self {
        let mut vertex_array = VertexArray::new(label);
        vertex_array.set_data(gpu, vertices, indices);
        Self {
            vertex_array,
            material,
            cast_shadows: true,
        }
    }

    pub fn with_shadows(mut self, cast_shadows: bool) -> Self {
        self.cast_shadows = cast_shadows;
        self
    }

    pub fn material(&self) -> ObjectId {
        self.material
    }

    pub fn vertex_array(&self) -> &VertexArray {
        &self.vertex_array
    }

    pub fn cast_shadows(&self) -> bool {
        self.cast_shadows
    }

    pub fn set_data(&mut self, gpu: &mut GpuContext, vertices: &VertexData, indices: Option<&IndexData>) {
        self.vertex_array.set_data(gpu, vertices, indices);
    }

    pub fn draw(&self, gpu: &mut GpuContext) -> Result<(), GpuError> {
        self.vertex_array.draw(gpu)
    }
}

impl SceneObject for MeshComponent {
    fn type_name(&self) -> &'static str {
        "Mesh"
    }

    fn capabilities(&self) -> Capabilities {
        if self.cast_shadows {
            Capabilities::RENDERABLE | Capabilities::SHADOW_CASTER
        } else {
            Capabilities::RENDERABLE
        }
    }

    fn references(&self) -> Vec<ObjectId> {
        vec![self.material]
    }

    fn do_deallocation(&mut self, gpu: &mut GpuContext) {
        self.vertex_array.free(gpu);
    }

    impl_as_any!();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LightKind {
    Point,
    Directional,
}

impl LightKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Directional => "directional",
        }
    }
}

/// Shadow-map array layers, one allocator per light kind.
#[derive(Debug)]
pub struct ShadowSlots {
    point: SlotAllocator<u32>,
    directional: SlotAllocator<u32>,
}

impl ShadowSlots {
    pub fn new(point_layers: u32, directional_layers: u32) -> Self {
        Self {
            point: SlotAllocator::new("shadow.point", 0..point_layers),
            directional: SlotAllocator::new("shadow.directional", 0..directional_layers),
        }
    }

    pub fn allocator(&self, kind: LightKind) -> &SlotAllocator<u32> {
        match kind {
            LightKind::Point => &self.point,
            LightKind::Directional => &self.directional,
        }
    }

    pub fn capacity(&self, kind: LightKind) -> usize {
        self.allocator(kind).capacity()
    }
}

/// A light source. Shadow-casting lights hold one layer of their kind's
/// shadow-map array until deallocated.
#[derive(Debug)]
pub struct LightComponent {
    kind: LightKind,
    color: Vec3,
    intensity: f32,
    direction: Vec3,
    shadow: Option<(Arc<ShadowSlots>, u32)>,
}

impl LightComponent {
    pub fn point(color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            intensity,
            direction: Vec3::NEG_Y,
            shadow: None,
        }
    }

    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            intensity,
            direction: direction.normalize_or(Vec3::NEG_Y),
            shadow: None,
        }
    }

    /// Claim a shadow-map layer. Fails when every layer of this kind is taken.
    pub fn with_shadow(mut self, slots: &Arc<ShadowSlots>) -> Result<Self, SlotError> {
        let layer = slots.allocator(self.kind).alloc()?;
        tracing::debug!(kind = self.kind.as_str(), layer, "shadow layer allocated");
        self.shadow = Some((slots.clone(), layer));
        Ok(self)
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }

    pub fn color(&self) -> Vec3 {
        self.color
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn shadow_layer(&self) -> Option<u32> {
        self.shadow.as_ref().map(|(_, layer)| *layer)
    }

    /// Light-space view-projection for shadow rendering from `position`.
    pub fn view_proj(&self, position: Vec3) -> Mat4 {
        match self.kind {
            LightKind::Directional => {
                let up = if self.direction.abs_diff_eq(Vec3::NEG_Y, 1e-3) || self.direction.abs_diff_eq(Vec3::Y, 1e-3) {
                    Vec3::Z
                } else {
                    Vec3::Y
                };
                let eye = -self.direction * 20.0;
                Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, 0.1, 50.0) * Mat4::look_at_rh(eye, Vec3::ZERO, up)
            }
            LightKind::Point => {
                Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 50.0)
                    * Mat4::look_at_rh(position, position + Vec3::NEG_Y, Vec3::Z)
            }
        }
    }
}

impl SceneObject for LightComponent {
    fn type_name(&self) -> &'static str {
        "Light"
    }

    fn capabilities(&self) -> Capabilities {
        if self.shadow.is_some() {
            Capabilities::LIGHT | Capabilities::SHADOW_CASTER
        } else {
            Capabilities::LIGHT
        }
    }

    fn do_deallocation(&mut self, _gpu: &mut GpuContext) {
        if let Some((slots, layer)) = self.shadow.take() {
            slots.allocator(self.kind).free(layer);
            tracing::debug!(kind = self.kind.as_str(), layer, "shadow layer released");
        }
    }

    impl_as_any!();
}
