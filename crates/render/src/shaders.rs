//! Built-in GLSL sources for the standard pipelines and materials.

use kiln_assets::MemoryAssets;
use kiln_gpu::{ShaderDesc, ShaderStage};

/// Lights the deferred lighting pass accepts per frame.
pub const MAX_LIGHTS: usize = 8;

const COMMON: &str = r#"// shared helpers
vec3 kiln_encode_normal(vec3 n) {
    return normalize(n) * 0.5 + 0.5;
}

vec3 kiln_decode_normal(vec3 e) {
    return normalize(e * 2.0 - 1.0);
}
"#;

const MESH_VERT: &str = r#"#version 330 core
#include "common.glsl"
layout(location = 0) in vec3 a_position;
layout(location = 1) in vec3 a_normal;
layout(location = 2) in vec2 a_uv;
uniform mat4 u_model;
uniform mat4 u_view_proj;
out vec3 v_normal;
out vec2 v_uv;

void main() {
    v_normal = mat3(u_model) * a_normal;
    v_uv = a_uv;
    gl_Position = u_view_proj * u_model * vec4(a_position, 1.0);
}
"#;

const STANDARD_FRAG: &str = r#"#version 330 core
#include "common.glsl"
in vec3 v_normal;
in vec2 v_uv;
uniform sampler2D u_albedo;
uniform vec4 u_tint;
layout(location = 0) out vec4 o_albedo;
layout(location = 1) out vec4 o_normal;

void main() {
    o_albedo = texture(u_albedo, v_uv) * u_tint;
    o_normal = vec4(kiln_encode_normal(v_normal), 1.0);
}
"#;

const TRANSPARENT_FRAG: &str = r#"#version 330 core
in vec3 v_normal;
in vec2 v_uv;
uniform vec4 u_tint;
out vec4 o_color;

void main() {
    o_color = u_tint;
}
"#;

const SHADOW_VERT: &str = r#"#version 330 core
layout(location = 0) in vec3 a_position;
uniform mat4 u_model;
uniform mat4 u_light_view_proj;

void main() {
    gl_Position = u_light_view_proj * u_model * vec4(a_position, 1.0);
}
"#;

const SHADOW_FRAG: &str = r#"#version 330 core
void main() {}
"#;

const SCREEN_VERT: &str = r#"#version 330 core
layout(location = 0) in vec2 a_position;
layout(location = 1) in vec2 a_uv;
out vec2 v_uv;

void main() {
    v_uv = a_uv;
    gl_Position = vec4(a_position, 0.0, 1.0);
}
"#;

const LIGHTING_FRAG: &str = r#"#version 330 core
#define MAX_LIGHTS 8
#include "common.glsl"
in vec2 v_uv;
uniform sampler2D u_albedo;
uniform sampler2D u_normal;
uniform sampler2D u_depth;
uniform sampler2DArray u_shadow_directional;
uniform int u_light_count;
uniform vec3 u_light_color[MAX_LIGHTS];
uniform vec3 u_light_dir[MAX_LIGHTS];
uniform int u_light_layer[MAX_LIGHTS];
layout(std140) uniform Lights {
    mat4 light_view_proj[MAX_LIGHTS];
};
out vec4 o_color;

void main() {
    vec3 albedo = texture(u_albedo, v_uv).rgb;
    vec3 n = kiln_decode_normal(texture(u_normal, v_uv).xyz);
    vec3 lit = albedo * 0.1;
    for (int i = 0; i < u_light_count; ++i) {
        lit += albedo * u_light_color[i] * max(dot(n, -u_light_dir[i]), 0.0);
    }
    o_color = vec4(lit, 1.0);
}
"#;

const SCREEN_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
uniform sampler2D u_source;
uniform float u_exposure;
out vec4 o_color;

void main() {
    vec3 c = texture(u_source, v_uv).rgb * u_exposure;
    o_color = vec4(c / (c + 1.0), 1.0);
}
"#;

/// Sub-paths and sources of every built-in shader file.
pub const SOURCES: &[(&str, &str)] = &[
    ("kiln/common.glsl", COMMON),
    ("kiln/mesh.vert", MESH_VERT),
    ("kiln/standard.frag", STANDARD_FRAG),
    ("kiln/transparent.frag", TRANSPARENT_FRAG),
    ("kiln/shadow.vert", SHADOW_VERT),
    ("kiln/shadow.frag", SHADOW_FRAG),
    ("kiln/screen.vert", SCREEN_VERT),
    ("kiln/lighting.frag", LIGHTING_FRAG),
    ("kiln/screen.frag", SCREEN_FRAG),
];

/// An asset bundle holding the built-in shaders. Callers may add their own
/// entries to the same bundle.
pub fn builtin_assets() -> MemoryAssets {
    let assets = MemoryAssets::new();
    for (sub_path, source) in SOURCES {
        assets.insert(*sub_path, *source);
    }
    assets
}

/// Opaque textured material drawn into the g-buffer.
pub fn standard_material(name: &str) -> ShaderDesc {
    ShaderDesc::new(name)
        .stage(ShaderStage::Vertex, "kiln/mesh.vert")
        .stage(ShaderStage::Fragment, "kiln/standard.frag")
}

/// Flat-tinted material for the forward pass.
pub fn transparent_material(name: &str) -> ShaderDesc {
    ShaderDesc::new(name)
        .stage(ShaderStage::Vertex, "kiln/mesh.vert")
        .stage(ShaderStage::Fragment, "kiln/transparent.frag")
}

pub(crate) fn shadow_depth() -> ShaderDesc {
    ShaderDesc::new("shadow_depth")
        .stage(ShaderStage::Vertex, "kiln/shadow.vert")
        .stage(ShaderStage::Fragment, "kiln/shadow.frag")
}

pub(crate) fn deferred_lighting() -> ShaderDesc {
    ShaderDesc::new("deferred_lighting")
        .stage(ShaderStage::Vertex, "kiln/screen.vert")
        .stage(ShaderStage::Fragment, "kiln/lighting.frag")
        .define("MAX_LIGHTS", MAX_LIGHTS)
}

pub(crate) fn screen_composite() -> ShaderDesc {
    ShaderDesc::new("screen")
        .stage(ShaderStage::Vertex, "kiln/screen.vert")
        .stage(ShaderStage::Fragment, "kiln/screen.frag")
}
