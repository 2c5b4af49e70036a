use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::error;
use render_backend_traits::backend::BackendInterface;
use render_backend_traits::binding::{BindingSet, ShaderBinding, StateBindings};
use render_backend_traits::buffer::Buffer;
use render_backend_traits::pipeline_state::{
    ComputeState, RayTracingState, RenderState, RenderStateDescription, ShaderBindingTable,
};
use render_backend_traits::render_target::{Attachment, RenderTarget};
use render_backend_traits::resource::RegistryId;
use render_backend_traits::rt::{BottomLevelAs, RtGeometry, RtGeometryInstance, TopLevelAs};
use render_backend_traits::sampler::{Sampler, SamplerDescription};
use render_backend_traits::shader::Shader;
use render_backend_traits::texture::Texture;
use render_types::buffer::BufferUsage;
use render_types::extent::Extent2D;
use render_types::format::TextureFormat;
use render_types::rendering::ClearColor;
use render_types::texture::{
    Filters, MipmapMode, Multisampling, TextureDescription, TextureType, WrapModes,
};

/// An edge in the inter-node dependency graph, recorded whenever a node
/// looks up a resource another node published.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeDependency {
    pub consumer: String,
    pub producer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseMode {
    Created,
    Reused,
}

struct Published<T> {
    resource: Arc<T>,
    publisher: String,
}

/// Owns every resource created during one pipeline construction and wires
/// publish/subscribe between nodes. A registry is either per-pipeline
/// (destroyed on the next reconstruction, after a device idle) or
/// persistent (lives until shutdown); the two differ only in lifetime.
pub struct Registry {
    id: RegistryId,
    backend: Arc<dyn BackendInterface>,
    window_render_target: Arc<RenderTarget>,

    current_node: Option<String>,
    processed_node_names: Vec<String>,
    node_dependencies: HashSet<NodeDependency>,

    published_buffers: HashMap<String, Published<Buffer>>,
    published_textures: HashMap<String, Published<Texture>>,
    published_binding_sets: HashMap<String, Published<BindingSet>>,
    published_top_level_as: HashMap<String, Published<TopLevelAs>>,

    buffers: Vec<Arc<Buffer>>,
    textures: Vec<Arc<Texture>>,
    samplers: Vec<Arc<Sampler>>,
    render_targets: Vec<Arc<RenderTarget>>,
    binding_sets: Vec<Arc<BindingSet>>,
    render_states: Vec<Arc<RenderState>>,
    compute_states: Vec<Arc<ComputeState>>,
    ray_tracing_states: Vec<Arc<RayTracingState>>,
    bottom_level_as: Vec<Arc<BottomLevelAs>>,
    top_level_as: Vec<Arc<TopLevelAs>>,

    /// The registry of the previous pipeline construction; consulted by
    /// the create-or-reuse paths, dropped once construction finishes.
    previous: Option<Box<Registry>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.id)
            .field("textures", &self.textures.len())
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

impl Registry {
    pub fn new(backend: Arc<dyn BackendInterface>, previous: Option<Registry>) -> Self {
        let window_render_target = backend.window_render_target();
        Self {
            id: RegistryId::next(),
            backend,
            window_render_target,
            current_node: None,
            processed_node_names: Vec::new(),
            node_dependencies: HashSet::new(),
            published_buffers: HashMap::new(),
            published_textures: HashMap::new(),
            published_binding_sets: HashMap::new(),
            published_top_level_as: HashMap::new(),
            buffers: Vec::new(),
            textures: Vec::new(),
            samplers: Vec::new(),
            render_targets: Vec::new(),
            binding_sets: Vec::new(),
            render_states: Vec::new(),
            compute_states: Vec::new(),
            ray_tracing_states: Vec::new(),
            bottom_level_as: Vec::new(),
            top_level_as: Vec::new(),
            previous: previous.map(Box::new),
        }
    }

    pub fn id(&self) -> RegistryId {
        self.id
    }

    pub fn backend(&self) -> &Arc<dyn BackendInterface> {
        &self.backend
    }

    pub fn window_render_target(&self) -> Arc<RenderTarget> {
        self.window_render_target.clone()
    }

    /// Drops the previous-construction registry. The caller must have
    /// forced the device idle first; its resources may still be in flight
    /// otherwise.
    pub fn release_previous(&mut self) {
        self.previous = None;
    }

    // node scoping, driven by the pipeline during construction

    pub fn set_current_node(&mut self, node_name: Option<String>) {
        if let Some(name) = &node_name {
            self.processed_node_names.push(name.clone());
        }
        self.current_node = node_name;
    }

    fn current_node_name(&self) -> &str {
        self.current_node
            .as_deref()
            .expect("registry accessed outside of a node construct phase")
    }

    /// Whether a node of that name was constructed before the current one,
    /// for conditional wiring against optional upstream nodes.
    pub fn has_previous_node(&self, name: &str) -> bool {
        let current = self.current_node.as_deref();
        self.processed_node_names
            .iter()
            .any(|n| n == name && Some(n.as_str()) != current)
    }

    pub fn node_dependencies(&self) -> &HashSet<NodeDependency> {
        &self.node_dependencies
    }

    // factories; every resource created here is owned by this registry

    fn adopt<T>(&self, resource: &T)
    where
        T: HasResourceBase,
    {
        resource.resource_base().set_owner_registry(self.id);
    }

    pub fn create_buffer(&mut self, size: usize, usage: BufferUsage) -> Arc<Buffer> {
        let buffer = self
            .backend
            .create_buffer(size, usage, None)
            .unwrap_or_else(|err| panic!("registry: buffer creation failed: {err:#}"));
        self.adopt(&buffer);
        let buffer = Arc::new(buffer);
        self.buffers.push(buffer.clone());
        buffer
    }

    pub fn create_buffer_with_data(&mut self, data: &[u8], usage: BufferUsage) -> Arc<Buffer> {
        let buffer = self
            .backend
            .create_buffer_with_data(data, usage, None)
            .unwrap_or_else(|err| panic!("registry: buffer creation failed: {err:#}"));
        self.adopt(&buffer);
        let buffer = Arc::new(buffer);
        self.buffers.push(buffer.clone());
        buffer
    }

    pub fn create_texture(&mut self, desc: TextureDescription) -> Arc<Texture> {
        if let Err(msg) = desc.validate() {
            error!("registry: invalid texture description: {msg}");
            panic!("registry: invalid texture description: {msg}");
        }
        let texture = self
            .backend
            .create_texture(desc)
            .unwrap_or_else(|err| panic!("registry: texture creation failed: {err:#}"));
        self.adopt(&texture);
        let texture = Arc::new(texture);
        self.textures.push(texture.clone());
        texture
    }

    pub fn create_texture_2d(
        &mut self,
        extent: Extent2D,
        format: TextureFormat,
        filters: Filters,
        mipmap_mode: MipmapMode,
        wrap_modes: WrapModes,
    ) -> Arc<Texture> {
        self.create_texture(TextureDescription {
            ty: TextureType::Tex2d,
            extent: extent.into(),
            format,
            filters,
            mipmap_mode,
            wrap_modes,
            ..Default::default()
        })
    }

    pub fn create_texture_array(
        &mut self,
        item_count: u32,
        extent: Extent2D,
        format: TextureFormat,
        filters: Filters,
        mipmap_mode: MipmapMode,
    ) -> Arc<Texture> {
        self.create_texture(TextureDescription {
            ty: TextureType::Tex2d,
            array_count: item_count,
            extent: extent.into(),
            format,
            filters,
            mipmap_mode,
            ..Default::default()
        })
    }

    pub fn create_multisampled_texture_2d(
        &mut self,
        extent: Extent2D,
        format: TextureFormat,
        multisampling: Multisampling,
    ) -> Arc<Texture> {
        self.create_texture(TextureDescription {
            ty: TextureType::Tex2d,
            extent: extent.into(),
            format,
            multisampling,
            ..Default::default()
        })
    }

    pub fn create_cubemap_texture(
        &mut self,
        extent: Extent2D,
        format: TextureFormat,
    ) -> Arc<Texture> {
        self.create_texture(TextureDescription {
            ty: TextureType::Cubemap,
            extent: extent.into(),
            format,
            ..Default::default()
        })
    }

    /// 1x1 placeholder texture holding a single color, the usual
    /// substitute for lookups that found nothing.
    pub fn create_pixel_texture(&mut self, pixel_color: ClearColor, srgb: bool) -> Arc<Texture> {
        let texture = self.create_texture(TextureDescription {
            ty: TextureType::Tex2d,
            extent: Extent2D::new(1, 1).into(),
            format: if srgb {
                TextureFormat::Srgba8Unorm
            } else {
                TextureFormat::Rgba8Unorm
            },
            ..Default::default()
        });
        texture
            .set_pixel_data(pixel_color)
            .unwrap_or_else(|err| panic!("registry: pixel texture fill failed: {err:#}"));
        texture
    }

    /// Reuses the identically named & described texture from the previous
    /// registry when possible, otherwise creates a fresh one; either way
    /// the texture is published under `name`. Reuse keeps long-lived
    /// contents (history buffers, pyramids) across pipeline
    /// reconstructions.
    pub fn create_or_reuse_texture_2d(
        &mut self,
        name: &str,
        extent: Extent2D,
        format: TextureFormat,
        filters: Filters,
        mipmap_mode: MipmapMode,
        wrap_modes: WrapModes,
    ) -> (Arc<Texture>, ReuseMode) {
        let desc = TextureDescription {
            ty: TextureType::Tex2d,
            extent: extent.into(),
            format,
            filters,
            mipmap_mode,
            wrap_modes,
            ..Default::default()
        };

        if let Some(previous) = &mut self.previous {
            if let Some(published) = previous.published_textures.remove(name) {
                if published.resource.description() == &desc {
                    let texture = published.resource;
                    texture.base().set_owner_registry(self.id);
                    self.textures.push(texture.clone());
                    self.publish_texture(name, texture.clone());
                    return (texture, ReuseMode::Reused);
                }
                // described differently now; let the old one die with the
                // previous registry
                previous.published_textures.insert(
                    name.to_string(),
                    published,
                );
            }
        }

        let texture = self.create_texture(desc);
        self.publish_texture(name, texture.clone());
        (texture, ReuseMode::Created)
    }

    pub fn create_sampler(&mut self, desc: SamplerDescription) -> Arc<Sampler> {
        let sampler = self
            .backend
            .create_sampler(desc)
            .unwrap_or_else(|err| panic!("registry: sampler creation failed: {err:#}"));
        self.adopt(&sampler);
        let sampler = Arc::new(sampler);
        self.samplers.push(sampler.clone());
        sampler
    }

    pub fn create_render_target(&mut self, attachments: Vec<Attachment>) -> Arc<RenderTarget> {
        let render_target = self
            .backend
            .create_render_target(attachments)
            .unwrap_or_else(|err| panic!("registry: render target creation failed: {err:#}"));
        self.adopt(&render_target);
        let render_target = Arc::new(render_target);
        self.render_targets.push(render_target.clone());
        render_target
    }

    pub fn create_binding_set(&mut self, bindings: Vec<ShaderBinding>) -> Arc<BindingSet> {
        let binding_set = self
            .backend
            .create_binding_set(bindings)
            .unwrap_or_else(|err| panic!("registry: binding set creation failed: {err:#}"));
        self.adopt(&binding_set);
        let binding_set = Arc::new(binding_set);
        self.binding_sets.push(binding_set.clone());
        binding_set
    }

    pub fn create_render_state(&mut self, desc: RenderStateDescription) -> Arc<RenderState> {
        let render_state = self
            .backend
            .create_render_state(desc)
            .unwrap_or_else(|err| panic!("registry: render state creation failed: {err:#}"));
        self.adopt(&render_state);
        let render_state = Arc::new(render_state);
        self.render_states.push(render_state.clone());
        render_state
    }

    pub fn create_compute_state(
        &mut self,
        shader: Shader,
        state_bindings: StateBindings,
    ) -> Arc<ComputeState> {
        let compute_state = self
            .backend
            .create_compute_state(shader, state_bindings)
            .unwrap_or_else(|err| panic!("registry: compute state creation failed: {err:#}"));
        self.adopt(&compute_state);
        let compute_state = Arc::new(compute_state);
        self.compute_states.push(compute_state.clone());
        compute_state
    }

    pub fn create_ray_tracing_state(
        &mut self,
        shader_binding_table: ShaderBindingTable,
        state_bindings: StateBindings,
        max_recursion_depth: u32,
    ) -> Arc<RayTracingState> {
        let state = self
            .backend
            .create_ray_tracing_state(shader_binding_table, state_bindings, max_recursion_depth)
            .unwrap_or_else(|err| panic!("registry: ray tracing state creation failed: {err:#}"));
        self.adopt(&state);
        let state = Arc::new(state);
        self.ray_tracing_states.push(state.clone());
        state
    }

    pub fn create_bottom_level_acceleration_structure(
        &mut self,
        geometries: Vec<RtGeometry>,
    ) -> Arc<BottomLevelAs> {
        let blas = self
            .backend
            .create_bottom_level_acceleration_structure(geometries)
            .unwrap_or_else(|err| panic!("registry: BLAS creation failed: {err:#}"));
        self.adopt(&blas);
        let blas = Arc::new(blas);
        self.bottom_level_as.push(blas.clone());
        blas
    }

    pub fn create_top_level_acceleration_structure(
        &mut self,
        max_instance_count: u32,
        initial_instances: Vec<RtGeometryInstance>,
    ) -> Arc<TopLevelAs> {
        let tlas = self
            .backend
            .create_top_level_acceleration_structure(max_instance_count, initial_instances)
            .unwrap_or_else(|err| panic!("registry: TLAS creation failed: {err:#}"));
        self.adopt(&tlas);
        let tlas = Arc::new(tlas);
        self.top_level_as.push(tlas.clone());
        tlas
    }

    // publish / subscribe

    pub fn publish_buffer(&mut self, name: &str, buffer: Arc<Buffer>) {
        let publisher = self.current_node_name().to_string();
        Self::publish_into(
            self.id,
            &mut self.published_buffers,
            name,
            &publisher,
            buffer,
            |b| b.base(),
            |b, n| b.set_name(n),
        );
    }

    pub fn publish_texture(&mut self, name: &str, texture: Arc<Texture>) {
        let publisher = self.current_node_name().to_string();
        Self::publish_into(
            self.id,
            &mut self.published_textures,
            name,
            &publisher,
            texture,
            |t| t.base(),
            |t, n| t.set_name(n),
        );
    }

    pub fn publish_binding_set(&mut self, name: &str, binding_set: Arc<BindingSet>) {
        let publisher = self.current_node_name().to_string();
        Self::publish_into(
            self.id,
            &mut self.published_binding_sets,
            name,
            &publisher,
            binding_set,
            |s| s.base(),
            |s, n| s.set_name(n),
        );
    }

    pub fn publish_top_level_as(&mut self, name: &str, tlas: Arc<TopLevelAs>) {
        let publisher = self.current_node_name().to_string();
        Self::publish_into(
            self.id,
            &mut self.published_top_level_as,
            name,
            &publisher,
            tlas,
            |t| t.base(),
            |t, n| t.set_name(n),
        );
    }

    fn publish_into<T>(
        id: RegistryId,
        map: &mut HashMap<String, Published<T>>,
        name: &str,
        publisher: &str,
        resource: Arc<T>,
        base_of: impl Fn(&T) -> &render_backend_traits::resource::ResourceBase,
        set_name: impl Fn(&T, &str),
    ) {
        if base_of(&resource).owner_registry() != id {
            error!(
                "registry: node '{publisher}' published '{name}' but the resource is not owned \
                 by this registry; a persistent resource published into a per-pipeline registry?"
            );
            panic!("registry: published resource '{name}' is not owned by this registry");
        }
        if map.contains_key(name) {
            error!(
                "registry: node '{publisher}' published '{name}' but that name is already taken; \
                 published names must be unique per resource kind"
            );
            panic!("registry: duplicate published name '{name}'");
        }
        // the published name doubles as the debug name
        set_name(&resource, name);
        map.insert(
            name.to_string(),
            Published {
                resource,
                publisher: publisher.to_string(),
            },
        );
    }

    // pool handles, for identifying resources across node boundaries
    // without holding a reference

    pub fn buffer_handle(&self, buffer: &Arc<Buffer>) -> render_types::handle::BufferHandle {
        self.buffers
            .iter()
            .position(|b| Arc::ptr_eq(b, buffer))
            .map(|index| render_types::handle::BufferHandle::from_index(index as u64))
            .unwrap_or_default()
    }

    pub fn buffer_by_handle(
        &self,
        handle: render_types::handle::BufferHandle,
    ) -> Option<Arc<Buffer>> {
        if !handle.is_valid() {
            return None;
        }
        self.buffers.get(handle.index() as usize).cloned()
    }

    pub fn texture_handle(&self, texture: &Arc<Texture>) -> render_types::handle::TextureHandle {
        self.textures
            .iter()
            .position(|t| Arc::ptr_eq(t, texture))
            .map(|index| render_types::handle::TextureHandle::from_index(index as u64))
            .unwrap_or_default()
    }

    pub fn texture_by_handle(
        &self,
        handle: render_types::handle::TextureHandle,
    ) -> Option<Arc<Texture>> {
        if !handle.is_valid() {
            return None;
        }
        self.textures.get(handle.index() as usize).cloned()
    }

    pub fn get_buffer(&mut self, name: &str) -> Option<Arc<Buffer>> {
        let consumer = self.current_node_name().to_string();
        let found = self.published_buffers.get(name).map(|p| (p.resource.clone(), p.publisher.clone()));
        self.record_dependency(found, consumer)
    }

    pub fn get_texture(&mut self, name: &str) -> Option<Arc<Texture>> {
        let consumer = self.current_node_name().to_string();
        let found = self.published_textures.get(name).map(|p| (p.resource.clone(), p.publisher.clone()));
        self.record_dependency(found, consumer)
    }

    pub fn get_binding_set(&mut self, name: &str) -> Option<Arc<BindingSet>> {
        let consumer = self.current_node_name().to_string();
        let found = self.published_binding_sets.get(name).map(|p| (p.resource.clone(), p.publisher.clone()));
        self.record_dependency(found, consumer)
    }

    pub fn get_top_level_as(&mut self, name: &str) -> Option<Arc<TopLevelAs>> {
        let consumer = self.current_node_name().to_string();
        let found = self.published_top_level_as.get(name).map(|p| (p.resource.clone(), p.publisher.clone()));
        self.record_dependency(found, consumer)
    }

    fn record_dependency<T>(
        &mut self,
        found: Option<(Arc<T>, String)>,
        consumer: String,
    ) -> Option<Arc<T>> {
        // a miss is not an error; nodes adapt to absent upstream nodes
        let (resource, producer) = found?;
        if producer != consumer {
            self.node_dependencies.insert(NodeDependency {
                consumer,
                producer,
            });
        }
        Some(resource)
    }
}

/// Internal helper so `Registry::adopt` works across resource kinds.
trait HasResourceBase {
    fn resource_base(&self) -> &render_backend_traits::resource::ResourceBase;
}

macro_rules! impl_has_resource_base {
    ($($ty:ty),+ $(,)?) => {
        $(impl HasResourceBase for $ty {
            fn resource_base(&self) -> &render_backend_traits::resource::ResourceBase {
                self.base()
            }
        })+
    };
}

impl_has_resource_base!(
    Buffer,
    Texture,
    Sampler,
    RenderTarget,
    BindingSet,
    RenderState,
    ComputeState,
    RayTracingState,
    BottomLevelAs,
    TopLevelAs,
);
