use crate::GpuContext;
use crate::GpuError;
use crate::backend::{Attachment, FramebufferHandle, TextureDesc, TextureFormat};
use crate::texture::TextureId;
use glam::Vec4;

/// Texture to create for an owned attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentSpec {
    Color(TextureFormat),
    Depth(TextureFormat),
}

/// Attachment borrowed from a texture someone else owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAttachment {
    Color(TextureId),
    Depth(TextureId),
    DepthLayer(TextureId, u32),
}

/// A render target plus the textures it draws into.
///
/// Textures created by [`Framebuffer::build`] are owned and orphaned on
/// [`free`](Framebuffer::free); borrowed ones are left alone.
#[derive(Debug)]
pub struct Framebuffer {
    label: String,
    handle: FramebufferHandle,
    width: u32,
    height: u32,
    colors: Vec<TextureId>,
    depth: Option<TextureId>,
    owned: Vec<TextureId>,
}

impl Framebuffer {
    pub fn build(
        gpu: &mut GpuContext,
        label: &str,
        width: u32,
        height: u32,
        specs: &[AttachmentSpec],
    ) -> Result<Self, GpuError> {
        let mut colors = Vec::new();
        let mut depth = None;
        let mut owned = Vec::new();
        let mut attachments = Vec::with_capacity(specs.len());

        for (i, spec) in specs.iter().enumerate() {
            let (format, is_depth) = match *spec {
                AttachmentSpec::Color(format) => (format, false),
                AttachmentSpec::Depth(format) => (format, true),
            };
            let name = if is_depth {
                format!("{label}.depth")
            } else {
                format!("{label}.color{i}")
            };
            let id = gpu.create_texture(TextureDesc::new_2d(name, width, height, format));
            owned.push(id);
            let handle = gpu.texture_handle(id)?;
            if is_depth {
                depth = Some(id);
                attachments.push(Attachment::Depth(handle));
            } else {
                colors.push(id);
                attachments.push(Attachment::Color(handle));
            }
        }

        match gpu.create_framebuffer(label, &attachments) {
            Ok(handle) => Ok(Self {
                label: label.to_string(),
                handle,
                width,
                height,
                colors,
                depth,
                owned,
            }),
            Err(err) => {
                for id in owned {
                    gpu.release_texture(id);
                }
                Err(err)
            }
        }
    }

    /// Framebuffer over textures owned elsewhere, such as one layer of a
    /// shared shadow-map array.
    pub fn with_attachments(
        gpu: &mut GpuContext,
        label: &str,
        attachments: &[TargetAttachment],
    ) -> Result<Self, GpuError> {
        let mut colors = Vec::new();
        let mut depth = None;
        let mut resolved = Vec::with_capacity(attachments.len());
        let mut size = (0, 0);

        for attachment in attachments {
            let id = match *attachment {
                TargetAttachment::Color(id) | TargetAttachment::Depth(id) | TargetAttachment::DepthLayer(id, _) => id,
            };
            let record = gpu.textures().get(id).ok_or(GpuError::StaleTexture(id))?;
            size = (record.desc.width, record.desc.height);
            let handle = record.handle;
            resolved.push(match *attachment {
                TargetAttachment::Color(_) => {
                    colors.push(id);
                    Attachment::Color(handle)
                }
                TargetAttachment::Depth(_) => {
                    depth = Some(id);
                    Attachment::Depth(handle)
                }
                TargetAttachment::DepthLayer(_, layer) => {
                    depth = Some(id);
                    Attachment::DepthLayer(handle, layer)
                }
            });
        }

        let handle = gpu.create_framebuffer(label, &resolved)?;
        Ok(Self {
            label: label.to_string(),
            handle,
            width: size.0,
            height: size.1,
            colors,
            depth,
            owned: Vec::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn handle(&self) -> FramebufferHandle {
        self.handle
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn color(&self, index: usize) -> Option<TextureId> {
        self.colors.get(index).copied()
    }

    pub fn colors(&self) -> &[TextureId] {
        &self.colors
    }

    pub fn depth(&self) -> Option<TextureId> {
        self.depth
    }

    /// Bind as the draw target with a matching viewport.
    pub fn bind(&self, gpu: &mut GpuContext) {
        gpu.bind_framebuffer(Some(self.handle));
        gpu.set_viewport(self.width, self.height);
    }

    pub fn bind_and_clear(&self, gpu: &mut GpuContext, color: Vec4) {
        self.bind(gpu);
        gpu.clear(color, self.depth.is_some());
    }

    /// Delete the framebuffer and release the textures it owns.
    pub fn free(self, gpu: &mut GpuContext) {
        gpu.delete_framebuffer(self.handle);
        for id in self.owned {
            gpu.release_texture(id);
        }
    }
}
