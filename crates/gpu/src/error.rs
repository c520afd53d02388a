use crate::backend::ShaderStage;
use crate::texture::TextureId;
use kiln_assets::AssetError;

/// Errors from GPU resource operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("asset error: {0}")]
    Asset(#[from] AssetError),
    #[error("include cycle through {0}")]
    IncludeCycle(String),
    #[error("include depth limit exceeded at {0}")]
    IncludeDepth(String),
    #[error("malformed include in {file}: {line}")]
    MalformedInclude { file: String, line: String },
    #[error("shader '{shader}': {stage:?} stage failed to compile: {log}")]
    Compile {
        shader: String,
        stage: ShaderStage,
        log: String,
    },
    #[error("shader '{shader}' failed to link: {log}")]
    Link { shader: String, log: String },
    #[error("shader '{0}' has no stages")]
    NoStages(String),
    #[error("shader '{0}' is not compiled")]
    NotCompiled(String),
    #[error("shader '{shader}' has no uniform '{name}'")]
    MissingUniform { shader: String, name: String },
    #[error("shader '{shader}' has no uniform block '{name}'")]
    MissingUniformBlock { shader: String, name: String },
    #[error("unsupported vertex attribute '{attribute}': {reason}")]
    UnsupportedVertexFormat { attribute: String, reason: String },
    #[error("invalid vertex data: {0}")]
    InvalidVertexData(String),
    #[error("vertex array '{0}' has no data")]
    VertexArrayNotLoaded(String),
    #[error("framebuffer '{label}' is incomplete: {reason}")]
    FramebufferIncomplete { label: String, reason: String },
    #[error("texture {0:?} is no longer alive")]
    StaleTexture(TextureId),
}
