use std::fmt::Debug;
use std::sync::Arc;

use downcast_rs::{impl_downcast, Downcast};
use render_types::rendering::{DepthState, RasterState, StencilState};
use render_types::vertex::VertexLayout;

use crate::binding::StateBindings;
use crate::render_target::RenderTarget;
use crate::resource::ResourceBase;
use crate::shader::{NamedConstantLookup, Shader, ShaderFile, ShaderFileType, ShaderType};

pub trait StateBackendData: Downcast + Debug + Send + Sync {
    fn set_debug_name(&self, name: &str);
}
impl_downcast!(StateBackendData);

/// Fully described draw pipeline: compiled by the backend into a PSO at
/// creation, immutable afterwards.
pub struct RenderState {
    base: ResourceBase,
    render_target: Arc<RenderTarget>,
    vertex_layouts: Vec<VertexLayout>,
    shader: Shader,
    state_bindings: StateBindings,
    raster_state: RasterState,
    depth_state: DepthState,
    stencil_state: StencilState,
    named_constants: NamedConstantLookup,
    backend_data: Box<dyn StateBackendData>,
}

impl Debug for RenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderState")
            .field("name", &self.base.name())
            .field("shader", &self.shader.identity())
            .finish()
    }
}

/// All non-backend inputs of a [`RenderState`]; what registry callers build.
#[derive(Debug, Clone)]
pub struct RenderStateDescription {
    pub render_target: Arc<RenderTarget>,
    pub vertex_layouts: Vec<VertexLayout>,
    pub shader: Shader,
    pub state_bindings: StateBindings,
    pub raster_state: RasterState,
    pub depth_state: DepthState,
    pub stencil_state: StencilState,
}

impl RenderState {
    pub fn new(
        desc: RenderStateDescription,
        named_constants: NamedConstantLookup,
        backend_data: Box<dyn StateBackendData>,
    ) -> Self {
        assert!(
            matches!(desc.shader.ty(), ShaderType::Raster),
            "a render state requires a raster shader"
        );
        Self {
            base: ResourceBase::default(),
            render_target: desc.render_target,
            vertex_layouts: desc.vertex_layouts,
            shader: desc.shader,
            state_bindings: desc.state_bindings,
            raster_state: desc.raster_state,
            depth_state: desc.depth_state,
            stencil_state: desc.stencil_state,
            named_constants,
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

    pub fn render_target(&self) -> &Arc<RenderTarget> {
        &self.render_target
    }

    pub fn vertex_layouts(&self) -> &[VertexLayout] {
        &self.vertex_layouts
    }

    pub fn shader(&self) -> &Shader {
        &self.shader
    }

    pub fn state_bindings(&self) -> &StateBindings {
        &self.state_bindings
    }

    pub fn raster_state(&self) -> &RasterState {
        &self.raster_state
    }

    pub fn depth_state(&self) -> &DepthState {
        &self.depth_state
    }

    pub fn stencil_state(&self) -> &StencilState {
        &self.stencil_state
    }

    pub fn named_constants(&self) -> &NamedConstantLookup {
        &self.named_constants
    }

    pub fn backend_data(&self) -> &dyn StateBackendData {
        self.backend_data.as_ref()
    }
}

pub struct ComputeState {
    base: ResourceBase,
    shader: Shader,
    state_bindings: StateBindings,
    named_constants: NamedConstantLookup,
    backend_data: Box<dyn StateBackendData>,
}

impl Debug for ComputeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeState")
            .field("name", &self.base.name())
            .field("shader", &self.shader.identity())
            .finish()
    }
}

impl ComputeState {
    pub fn new(
        shader: Shader,
        state_bindings: StateBindings,
        named_constants: NamedConstantLookup,
        backend_data: Box<dyn StateBackendData>,
    ) -> Self {
        assert!(
            matches!(shader.ty(), ShaderType::Compute),
            "a compute state requires a compute shader"
        );
        Self {
            base: ResourceBase::default(),
            shader,
            state_bindings,
            named_constants,
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

    pub fn shader(&self) -> &Shader {
        &self.shader
    }

    pub fn state_bindings(&self) -> &StateBindings {
        &self.state_bindings
    }

    pub fn named_constants(&self) -> &NamedConstantLookup {
        &self.named_constants
    }

    pub fn backend_data(&self) -> &dyn StateBackendData {
        self.backend_data.as_ref()
    }
}

/// One hit-group entry of a shader binding table.
#[derive(Debug, Clone)]
pub struct HitGroup {
    closest_hit: ShaderFile,
    any_hit: Option<ShaderFile>,
    intersection: Option<ShaderFile>,
}

impl HitGroup {
    pub fn new(
        closest_hit: ShaderFile,
        any_hit: Option<ShaderFile>,
        intersection: Option<ShaderFile>,
    ) -> Self {
        assert!(matches!(closest_hit.ty(), ShaderFileType::RtClosestHit));
        if let Some(any_hit) = &any_hit {
            assert!(matches!(any_hit.ty(), ShaderFileType::RtAnyHit));
        }
        if let Some(intersection) = &intersection {
            assert!(matches!(intersection.ty(), ShaderFileType::RtIntersection));
        }
        Self {
            closest_hit,
            any_hit,
            intersection,
        }
    }

    pub fn closest_hit(&self) -> &ShaderFile {
        &self.closest_hit
    }

    pub fn any_hit(&self) -> Option<&ShaderFile> {
        self.any_hit.as_ref()
    }

    pub fn intersection(&self) -> Option<&ShaderFile> {
        self.intersection.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct ShaderBindingTable {
    ray_gen: ShaderFile,
    hit_groups: Vec<HitGroup>,
    miss_shaders: Vec<ShaderFile>,
}

impl ShaderBindingTable {
    pub fn new(ray_gen: ShaderFile, hit_groups: Vec<HitGroup>, miss_shaders: Vec<ShaderFile>) -> Self {
        assert!(matches!(ray_gen.ty(), ShaderFileType::RtRaygen));
        assert!(miss_shaders
            .iter()
            .all(|f| matches!(f.ty(), ShaderFileType::RtMiss)));
        Self {
            ray_gen,
            hit_groups,
            miss_shaders,
        }
    }

    pub fn ray_gen(&self) -> &ShaderFile {
        &self.ray_gen
    }

    pub fn hit_groups(&self) -> &[HitGroup] {
        &self.hit_groups
    }

    pub fn miss_shaders(&self) -> &[ShaderFile] {
        &self.miss_shaders
    }

    /// Every stage of the table, in SBT order, as one shader description
    /// (this is what gets compiled and cached).
    pub fn pseudo_shader(&self) -> Shader {
        let mut files = vec![self.ray_gen.clone()];
        for group in &self.hit_groups {
            files.push(group.closest_hit.clone());
            if let Some(any_hit) = &group.any_hit {
                files.push(any_hit.clone());
            }
            if let Some(intersection) = &group.intersection {
                files.push(intersection.clone());
            }
        }
        files.extend(self.miss_shaders.iter().cloned());
        Shader::create_ray_tracing(files, Vec::new())
    }
}

pub struct RayTracingState {
    base: ResourceBase,
    shader_binding_table: ShaderBindingTable,
    state_bindings: StateBindings,
    max_recursion_depth: u32,
    named_constants: NamedConstantLookup,
    backend_data: Box<dyn StateBackendData>,
}

impl Debug for RayTracingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayTracingState")
            .field("name", &self.base.name())
            .field("max_recursion_depth", &self.max_recursion_depth)
            .finish()
    }
}

impl RayTracingState {
    pub fn new(
        shader_binding_table: ShaderBindingTable,
        state_bindings: StateBindings,
        max_recursion_depth: u32,
        named_constants: NamedConstantLookup,
        backend_data: Box<dyn StateBackendData>,
    ) -> Self {
        Self {
            base: ResourceBase::default(),
            shader_binding_table,
            state_bindings,
            max_recursion_depth,
            named_constants,
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

    pub fn shader_binding_table(&self) -> &ShaderBindingTable {
        &self.shader_binding_table
    }

    pub fn state_bindings(&self) -> &StateBindings {
        &self.state_bindings
    }

    pub fn max_recursion_depth(&self) -> u32 {
        self.max_recursion_depth
    }

    pub fn named_constants(&self) -> &NamedConstantLookup {
        &self.named_constants
    }

    pub fn backend_data(&self) -> &dyn StateBackendData {
        self.backend_data.as_ref()
    }
}
