use std::fmt::Debug;
use std::sync::Arc;

use downcast_rs::{impl_downcast, Downcast};
use render_types::extent::Extent2D;
use render_types::rendering::{AttachmentType, BlendMode, LoadOp, StoreOp};
use render_types::texture::Multisampling;

use crate::resource::ResourceBase;
use crate::texture::Texture;

#[derive(Debug, Clone)]
pub struct Attachment {
    pub ty: AttachmentType,
    pub texture: Arc<Texture>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub blend_mode: BlendMode,
    pub multisample_resolve_texture: Option<Arc<Texture>>,
}

impl Attachment {
    pub fn with_texture(ty: AttachmentType, texture: Arc<Texture>) -> Self {
        Self {
            ty,
            texture,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            blend_mode: BlendMode::None,
            multisample_resolve_texture: None,
        }
    }
}

pub trait RenderTargetBackendData: Downcast + Debug + Send + Sync {
    fn set_debug_name(&self, name: &str);
}
impl_downcast!(RenderTargetBackendData);

/// An ordered set of attachments rendered to together. The window render
/// target is the one special case: its color attachment is a placeholder
/// the backend patches to the acquired back buffer every frame.
pub struct RenderTarget {
    base: ResourceBase,
    attachments: Vec<Attachment>,
    extent: Extent2D,
    multisampling: Multisampling,
    is_window_target: bool,
    backend_data: Box<dyn RenderTargetBackendData>,
}

impl Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("name", &self.base.name())
            .field("extent", &self.extent)
            .field("attachment_count", &self.attachments.len())
            .finish()
    }
}

/// Checks the attachment topology invariants: non-empty, shared extent and
/// sample count, densely packed color slots from Color0, at most one depth,
/// and resolve textures exactly on multisampled color attachments.
pub fn validate_attachments(attachments: &[Attachment]) -> Result<(), String> {
    if attachments.is_empty() {
        return Err("a render target needs at least one attachment".into());
    }

    let first = &attachments[0].texture;
    let extent = first.extent().as_2d();
    let multisampling = first.description().multisampling;

    let mut color_indices: Vec<usize> = Vec::new();
    let mut depth_count = 0usize;

    for attachment in attachments {
        let texture = &attachment.texture;
        if texture.extent().as_2d() != extent {
            return Err(format!(
                "attachment '{}' extent differs from the first attachment",
                texture.name()
            ));
        }
        if texture.description().multisampling != multisampling {
            return Err(format!(
                "attachment '{}' multisampling differs from the first attachment",
                texture.name()
            ));
        }

        match attachment.ty.color_index() {
            Some(index) => {
                if !texture.is_multisampled() && attachment.multisample_resolve_texture.is_some() {
                    return Err(format!(
                        "attachment '{}' has a resolve texture but is not multisampled",
                        texture.name()
                    ));
                }
                if texture.is_multisampled() && attachment.multisample_resolve_texture.is_none() {
                    return Err(format!(
                        "multisampled attachment '{}' is missing a resolve texture",
                        texture.name()
                    ));
                }
                color_indices.push(index);
            }
            None => {
                if !texture.is_depth_format() {
                    return Err(format!(
                        "depth attachment '{}' does not have a depth format",
                        texture.name()
                    ));
                }
                depth_count += 1;
            }
        }
    }

    if depth_count > 1 {
        return Err("a render target may have at most one depth attachment".into());
    }

    color_indices.sort_unstable();
    for (expected, actual) in color_indices.iter().enumerate() {
        if *actual != expected {
            return Err(format!(
                "color attachments must be densely packed from Color0, found gap before Color{actual}"
            ));
        }
    }

    Ok(())
}

impl RenderTarget {
    /// Called by backend factories only. Panics on invalid attachment
    /// topology; that is a construction error, not a recoverable state.
    pub fn new(
        attachments: Vec<Attachment>,
        is_window_target: bool,
        backend_data: Box<dyn RenderTargetBackendData>,
    ) -> Self {
        if let Err(msg) = validate_attachments(&attachments) {
            log::error!("invalid render target: {msg}");
            panic!("invalid render target: {msg}");
        }

        let extent = attachments[0].texture.extent().as_2d();
        let multisampling = attachments[0].texture.description().multisampling;

        let mut sorted = attachments;
        sorted.sort_by_key(|a| a.ty.color_index().unwrap_or(usize::MAX));

        Self {
            base: ResourceBase::default(),
            attachments: sorted,
            extent,
            multisampling,
            is_window_target,
            backend_data,
        }
    }

    pub fn base(&self) -> &ResourceBase {
        &self.base
    }

    pub fn set_name(&self, name: &str) {
        self.base.set_name(name);
        self.backend_data.set_debug_name(name);
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn multisampling(&self) -> Multisampling {
        self.multisampling
    }

    pub fn is_window_target(&self) -> bool {
        self.is_window_target
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn color_attachment_count(&self) -> usize {
        self.attachments
            .iter()
            .filter(|a| a.ty.color_index().is_some())
            .count()
    }

    pub fn has_depth_attachment(&self) -> bool {
        self.attachments.iter().any(|a| a.ty.is_depth())
    }

    pub fn depth_attachment(&self) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.ty.is_depth())
    }

    pub fn color_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments
            .iter()
            .filter(|a| a.ty.color_index().is_some())
    }

    pub fn total_attachment_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn backend_data(&self) -> &dyn RenderTargetBackendData {
        self.backend_data.as_ref()
    }
}
