use crate::GpuError;
use crate::backend::Topology;
use bytemuck::{Pod, Zeroable};

/// Scalar type of a vertex attribute component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    F32,
    I32,
    U32,
    /// Unsigned byte normalized to `[0, 1]`.
    U8Norm,
    /// Not supported by any backend; rejected during layout derivation.
    F64,
}

impl ScalarType {
    fn size(self) -> u32 {
        match self {
            Self::U8Norm => 1,
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::F64 => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub name: String,
    pub scalar: ScalarType,
    pub components: u8,
    pub offset: u32,
}

/// Interleaved vertex layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
    stride: u32,
}

impl VertexLayout {
    /// Derive a tightly packed layout from `(name, scalar, components)`
    /// declarations.
    pub fn derive(fields: &[(&str, ScalarType, u8)]) -> Result<Self, GpuError> {
        if fields.is_empty() {
            return Err(GpuError::UnsupportedVertexFormat {
                attribute: String::new(),
                reason: "layout has no attributes".into(),
            });
        }

        let mut attributes = Vec::with_capacity(fields.len());
        let mut offset = 0u32;
        for &(name, scalar, components) in fields {
            if scalar == ScalarType::F64 {
                return Err(GpuError::UnsupportedVertexFormat {
                    attribute: name.to_string(),
                    reason: "double-precision attributes are not supported".into(),
                });
            }
            if !(1..=4).contains(&components) {
                return Err(GpuError::UnsupportedVertexFormat {
                    attribute: name.to_string(),
                    reason: format!("{components} components (expected 1 to 4)"),
                });
            }
            attributes.push(VertexAttribute {
                name: name.to_string(),
                scalar,
                components,
                offset,
            });
            offset += scalar.size() * components as u32;
        }

        Ok(Self {
            attributes,
            stride: offset,
        })
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Stable byte encoding used for content keys.
    pub(crate) fn signature(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for attr in &self.attributes {
            out.extend_from_slice(attr.name.as_bytes());
            out.push(0);
            out.push(attr.scalar as u8);
            out.push(attr.components);
            out.extend_from_slice(&attr.offset.to_le_bytes());
        }
        out.extend_from_slice(&self.stride.to_le_bytes());
        out
    }
}

/// A vertex type with a fixed interleaved layout.
pub trait Vertex: Pod {
    fn layout() -> Result<VertexLayout, GpuError>;
}

/// Position, normal and texture coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex for MeshVertex {
    fn layout() -> Result<VertexLayout, GpuError> {
        VertexLayout::derive(&[
            ("a_position", ScalarType::F32, 3),
            ("a_normal", ScalarType::F32, 3),
            ("a_uv", ScalarType::F32, 2),
        ])
    }
}

/// Clip-space position and texture coordinates for full-screen passes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ScreenVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl Vertex for ScreenVertex {
    fn layout() -> Result<VertexLayout, GpuError> {
        VertexLayout::derive(&[
            ("a_position", ScalarType::F32, 2),
            ("a_uv", ScalarType::F32, 2),
        ])
    }
}

/// Vertex bytes plus the layout and topology that interpret them.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexData {
    bytes: Vec<u8>,
    layout: VertexLayout,
    count: u32,
    topology: Topology,
}

impl VertexData {
    pub fn new<V: Vertex>(vertices: &[V], topology: Topology) -> Result<Self, GpuError> {
        let layout = V::layout()?;
        Self::from_raw(bytemuck::cast_slice(vertices).to_vec(), layout, topology)
    }

    pub fn from_raw(bytes: Vec<u8>, layout: VertexLayout, topology: Topology) -> Result<Self, GpuError> {
        let stride = layout.stride() as usize;
        if stride == 0 || bytes.len() % stride != 0 {
            return Err(GpuError::InvalidVertexData(format!(
                "{} bytes is not a multiple of the {stride}-byte stride",
                bytes.len()
            )));
        }
        let count = (bytes.len() / stride) as u32;
        Ok(Self {
            bytes,
            layout,
            count,
            topology,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::U16(v) => bytemuck::cast_slice(v),
            Self::U32(v) => bytemuck::cast_slice(v),
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            Self::U16(v) => v.len() as u32,
            Self::U32(v) => v.len() as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn width_tag(&self) -> u8 {
        match self {
            Self::U16(_) => 2,
            Self::U32(_) => 4,
        }
    }
}

/// Full-screen quad as a triangle strip.
pub fn fullscreen_quad() -> Result<VertexData, GpuError> {
    let vertices = [
        ScreenVertex { position: [-1.0, -1.0], uv: [0.0, 0.0] },
        ScreenVertex { position: [1.0, -1.0], uv: [1.0, 0.0] },
        ScreenVertex { position: [-1.0, 1.0], uv: [0.0, 1.0] },
        ScreenVertex { position: [1.0, 1.0], uv: [1.0, 1.0] },
    ];
    VertexData::new(&vertices, Topology::TriangleStrip)
}

/// Unit cube with per-face normals.
pub fn cube() -> Result<(VertexData, IndexData), GpuError> {
    let p = 0.5_f32;
    let faces: [([f32; 3], [[f32; 3]; 4]); 6] = [
        ([0.0, 0.0, 1.0], [[-p, -p, p], [p, -p, p], [p, p, p], [-p, p, p]]),
        ([0.0, 0.0, -1.0], [[p, -p, -p], [-p, -p, -p], [-p, p, -p], [p, p, -p]]),
        ([1.0, 0.0, 0.0], [[p, -p, p], [p, -p, -p], [p, p, -p], [p, p, p]]),
        ([-1.0, 0.0, 0.0], [[-p, -p, -p], [-p, -p, p], [-p, p, p], [-p, p, -p]]),
        ([0.0, 1.0, 0.0], [[-p, p, p], [p, p, p], [p, p, -p], [-p, p, -p]]),
        ([0.0, -1.0, 0.0], [[-p, -p, -p], [p, -p, -p], [p, -p, p], [-p, -p, p]]),
    ];
    let uvs = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (face, (normal, corners)) in faces.iter().enumerate() {
        let base = (face * 4) as u16;
        for (corner, uv) in corners.iter().zip(uvs) {
            vertices.push(MeshVertex {
                position: *corner,
                normal: *normal,
                uv,
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    Ok((
        VertexData::new(&vertices, Topology::Triangles)?,
        IndexData::U16(indices),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_packs_offsets() {
        let layout = MeshVertex::layout().unwrap();
        let offsets: Vec<u32> = layout.attributes().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(layout.stride(), 32);
        assert_eq!(layout.stride() as usize, std::mem::size_of::<MeshVertex>());
    }

    #[test]
    fn f64_attribute_is_rejected() {
        let err = VertexLayout::derive(&[("a_pos", ScalarType::F64, 3)]).unwrap_err();
        assert!(matches!(err, GpuError::UnsupportedVertexFormat { attribute, .. } if attribute == "a_pos"));
    }

    #[test]
    fn component_count_is_checked() {
        assert!(VertexLayout::derive(&[("a_pos", ScalarType::F32, 5)]).is_err());
        assert!(VertexLayout::derive(&[("a_pos", ScalarType::F32, 0)]).is_err());
        assert!(VertexLayout::derive(&[]).is_err());
    }

    #[test]
    fn raw_data_must_match_stride() {
        let layout = ScreenVertex::layout().unwrap();
        assert!(VertexData::from_raw(vec![0; 17], layout.clone(), Topology::Triangles).is_err());
        let data = VertexData::from_raw(vec![0; 32], layout, Topology::Triangles).unwrap();
        assert_eq!(data.count(), 2);
    }

    #[test]
    fn cube_has_24_vertices_and_36_indices() {
        let (vertices, indices) = cube().unwrap();
        assert_eq!(vertices.count(), 24);
        assert_eq!(indices.len(), 36);
        assert_eq!(indices.bytes().len(), 72);
    }

    #[test]
    fn quad_is_strip() {
        let quad = fullscreen_quad().unwrap();
        assert_eq!(quad.count(), 4);
        assert_eq!(quad.topology(), Topology::TriangleStrip);
    }
}
