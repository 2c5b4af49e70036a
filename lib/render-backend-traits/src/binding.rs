use std::fmt::Debug;
use std::sync::Arc;

use downcast_rs::{impl_downcast, Downcast};
use render_types::buffer::BufferUsage;
use render_types::capabilities::ShaderStageFlags;

use crate::buffer::Buffer;
use crate::resource::ResourceBase;
use crate::rt::TopLevelAs;
use crate::texture::{Texture, TextureMipView};

/// What a binding points at. Constructors on [`ShaderBinding`] validate the
/// resource against the binding type up front so the backends can trust it.
#[derive(Debug, Clone)]
pub enum ShaderBindingResource {
    ConstantBuffer(Arc<Buffer>),
    StorageBuffer(Arc<Buffer>),
    StorageTexture(TextureMipView),
    /// One or more sampled textures; more than one makes this a bindless
    /// array binding with `array_count` slots.
    SampledTexture(Vec<Arc<Texture>>),
    RtAccelerationStructure(Arc<TopLevelAs>),
}

#[derive(Debug, Clone)]
pub struct ShaderBinding {
    binding_index: Option<u32>,
    array_count: u32,
    shader_stage: ShaderStageFlags,
    resource: ShaderBindingResource,
}

impl ShaderBinding {
    pub fn constant_buffer(buffer: Arc<Buffer>, shader_stage: ShaderStageFlags) -> Self {
        assert!(
            matches!(buffer.usage(), BufferUsage::ConstantBuffer),
            "constant-buffer binding requires ConstantBuffer usage, '{}' is {:?}",
            buffer.name(),
            buffer.usage(),
        );
        Self {
            binding_index: None,
            array_count: 1,
            shader_stage,
            resource: ShaderBindingResource::ConstantBuffer(buffer),
        }
    }

    pub fn storage_buffer(buffer: Arc<Buffer>, shader_stage: ShaderStageFlags) -> Self {
        assert!(
            buffer.usage() == BufferUsage::StorageBuffer || buffer.is_storage_capable(),
            "storage-buffer binding requires a storage-capable buffer, '{}' is {:?}",
            buffer.name(),
            buffer.usage(),
        );
        Self {
            binding_index: None,
            array_count: 1,
            shader_stage,
            resource: ShaderBindingResource::StorageBuffer(buffer),
        }
    }

    pub fn storage_texture(texture: Arc<Texture>, shader_stage: ShaderStageFlags) -> Self {
        Self::storage_texture_at_mip(TextureMipView::new(texture, 0), shader_stage)
    }

    pub fn storage_texture_at_mip(view: TextureMipView, shader_stage: ShaderStageFlags) -> Self {
        assert!(
            view.texture().is_storage_capable(),
            "storage-texture binding requires a storage-capable format, '{}' is {:?}",
            view.texture().name(),
            view.texture().format(),
        );
        Self {
            binding_index: None,
            array_count: 1,
            shader_stage,
            resource: ShaderBindingResource::StorageTexture(view),
        }
    }

    pub fn sampled_texture(texture: Arc<Texture>, shader_stage: ShaderStageFlags) -> Self {
        Self::sampled_textures(vec![texture], shader_stage)
    }

    pub fn sampled_textures(textures: Vec<Arc<Texture>>, shader_stage: ShaderStageFlags) -> Self {
        assert!(
            !textures.is_empty(),
            "sampled-texture binding requires at least one texture"
        );
        Self {
            binding_index: None,
            array_count: textures.len() as u32,
            shader_stage,
            resource: ShaderBindingResource::SampledTexture(textures),
        }
    }

    /// Bindless array binding: `capacity` descriptor slots, initially
    /// filled with `textures` (may be fewer than `capacity`).
    pub fn sampled_texture_array(
        capacity: u32,
        textures: Vec<Arc<Texture>>,
        shader_stage: ShaderStageFlags,
    ) -> Self {
        assert!(
            textures.len() as u32 <= capacity,
            "bindless array holds {} textures but capacity is {capacity}",
            textures.len(),
        );
        Self {
            binding_index: None,
            array_count: capacity,
            shader_stage,
            resource: ShaderBindingResource::SampledTexture(textures),
        }
    }

    pub fn top_level_as(tlas: Arc<TopLevelAs>, shader_stage: ShaderStageFlags) -> Self {
        Self {
            binding_index: None,
            array_count: 1,
            shader_stage,
            resource: ShaderBindingResource::RtAccelerationStructure(tlas),
        }
    }

    /// Pins this binding to an explicit index. A binding set must use
    /// either explicit indices throughout or none at all.
    pub fn at_index(mut self, binding_index: u32) -> Self {
        self.binding_index = Some(binding_index);
        self
    }

    pub fn binding_index(&self) -> Option<u32> {
        self.binding_index
    }

    pub fn array_count(&self) -> u32 {
        self.array_count
    }

    pub fn shader_stage(&self) -> ShaderStageFlags {
        self.shader_stage
    }

    pub fn resource(&self) -> &ShaderBindingResource {
        &self.resource
    }

    fn set_resolved_index(&mut self, index: u32) {
        self.binding_index = Some(index);
    }
}

/// A texture replacement inside a bindless array binding.
#[derive(Debug, Clone)]
pub struct TextureBindingUpdate {
    pub array_index: u32,
    pub texture: Arc<Texture>,
}

pub trait BindingSetBackendData: Downcast + Debug + Send + Sync {
    fn set_debug_name(&self, name: &str);

    fn update_textures(
        &self,
        binding_index: u32,
        updates: &[TextureBindingUpdate],
    ) -> anyhow::Result<()>;
}
impl_downcast!(BindingSetBackendData);

/// Resolves binding indices: all implicit get 0..N in declaration order;
/// all explicit must be unique. Mixing the two is a construction error.
pub fn resolve_binding_indices(bindings: &mut [ShaderBinding]) {
    let explicit_count = bindings.iter().filter(|b| b.binding_index.is_some()).count();

    if explicit_count == 0 {
        for (index, binding) in bindings.iter_mut().enumerate() {
            binding.set_resolved_index(index as u32);
        }
        return;
    }

    assert!(
        explicit_count == bindings.len(),
        "a binding set must use either all-implicit or all-explicit binding indices"
    );

    let mut indices: Vec<u32> = bindings.iter().map(|b| b.binding_index.unwrap()).collect();
    indices.sort_unstable();
    indices.dedup();
    assert!(
        indices.len() == bindings.len(),
        "duplicate binding indices in binding set"
    );
}

pub struct BindingSet {
    base: ResourceBase,
    bindings: Vec<ShaderBinding>,
    backend_data: Box<dyn BindingSetBackendData>,
}

impl Debug for BindingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingSet")
            .field("name", &self.base.name())
            .field("binding_count", &self.bindings.len())
            .finish()
    }
}

impl BindingSet {
    /// Called by backend factories only; `bindings` must already have been
    /// run through [`resolve_binding_indices`].
    pub fn new(bindings: Vec<ShaderBinding>, backend_data: Box<dyn BindingSetBackendData>) -> Self {
        debug_assert!(bindings.iter().all(|b| b.binding_index.is_some()));
        Self {
            base: ResourceBase::default(),
            bindings,
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

    pub fn bindings(&self) -> &[ShaderBinding] {
        &self.bindings
    }

    pub fn binding(&self, binding_index: u32) -> Option<&ShaderBinding> {
        self.bindings
            .iter()
            .find(|b| b.binding_index == Some(binding_index))
    }

    pub fn backend_data(&self) -> &dyn BindingSetBackendData {
        self.backend_data.as_ref()
    }

    /// Rewrites slots of a bindless array binding.
    pub fn update_textures(
        &self,
        binding_index: u32,
        updates: &[TextureBindingUpdate],
    ) -> anyhow::Result<()> {
        let binding = self
            .binding(binding_index)
            .ok_or_else(|| anyhow::anyhow!("no binding at index {binding_index}"))?;
        anyhow::ensure!(
            matches!(binding.resource(), ShaderBindingResource::SampledTexture(_)),
            "updateTextures requires a sampled-texture binding"
        );
        for update in updates {
            anyhow::ensure!(
                update.array_index < binding.array_count(),
                "texture update index {} out of range ({} slots)",
                update.array_index,
                binding.array_count()
            );
        }
        self.backend_data.update_textures(binding_index, updates)
    }
}

/// Sparse mapping from descriptor-set index to binding set. The pipeline
/// root layout is derived from this, so the same `StateBindings` value
/// always produces the same layout.
#[derive(Debug, Default, Clone)]
pub struct StateBindings {
    sets: Vec<Option<Arc<BindingSet>>>,
}

impl StateBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(&mut self, set_index: u32, binding_set: Arc<BindingSet>) {
        let index = set_index as usize;
        if index >= self.sets.len() {
            self.sets.resize(index + 1, None);
        }
        assert!(
            self.sets[index].is_none(),
            "binding set index {set_index} is already occupied"
        );
        self.sets[index] = Some(binding_set);
    }

    pub fn get(&self, set_index: u32) -> Option<&Arc<BindingSet>> {
        self.sets.get(set_index as usize).and_then(|s| s.as_ref())
    }

    /// Highest occupied set index + 1.
    pub fn set_count(&self) -> u32 {
        self.sets.len() as u32
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Arc<BindingSet>)> {
        self.sets
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i as u32, s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // resolve_binding_indices operates before any backend data exists, so
    // it can be exercised without a backend.

    fn dummy_binding(index: Option<u32>) -> ShaderBinding {
        ShaderBinding {
            binding_index: index,
            array_count: 1,
            shader_stage: ShaderStageFlags::VERTEX,
            resource: ShaderBindingResource::SampledTexture(Vec::new()),
        }
    }

    #[test]
    fn implicit_indices_are_assigned_in_declaration_order() {
        let mut bindings = vec![dummy_binding(None), dummy_binding(None), dummy_binding(None)];
        resolve_binding_indices(&mut bindings);
        let indices: Vec<u32> = bindings.iter().map(|b| b.binding_index.unwrap()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn explicit_unique_indices_are_kept() {
        let mut bindings = vec![dummy_binding(Some(4)), dummy_binding(Some(0))];
        resolve_binding_indices(&mut bindings);
        assert_eq!(bindings[0].binding_index, Some(4));
        assert_eq!(bindings[1].binding_index, Some(0));
    }

    #[test]
    #[should_panic(expected = "duplicate binding indices")]
    fn duplicate_explicit_indices_panic() {
        let mut bindings = vec![dummy_binding(Some(1)), dummy_binding(Some(1))];
        resolve_binding_indices(&mut bindings);
    }

    #[test]
    #[should_panic(expected = "all-implicit or all-explicit")]
    fn mixed_index_modes_panic() {
        let mut bindings = vec![dummy_binding(Some(0)), dummy_binding(None)];
        resolve_binding_indices(&mut bindings);
    }
}
