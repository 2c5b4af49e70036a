use std::fmt::Debug;
use std::sync::Arc;

use downcast_rs::{impl_downcast, Downcast};
use parking_lot::RwLock;
use render_types::buffer::IndexType;

use crate::buffer::Buffer;
use crate::resource::ResourceBase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtVertexFormat {
    Xyz32Float,
}

/// 3x4 row-major transform, the layout acceleration-structure builds expect.
pub type RtTransform = [[f32; 4]; 3];

pub const RT_IDENTITY_TRANSFORM: RtTransform = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
];

#[derive(Debug, Clone)]
pub struct RtTriangleGeometry {
    pub vertex_buffer: Arc<Buffer>,
    pub vertex_format: RtVertexFormat,
    pub vertex_stride: usize,
    pub index_buffer: Arc<Buffer>,
    pub index_type: IndexType,
    pub transform: RtTransform,
}

#[derive(Debug, Clone)]
pub struct RtAabbGeometry {
    pub aabb_buffer: Arc<Buffer>,
    /// Byte stride between (min, max) AABB pairs; at least 24.
    pub aabb_stride: usize,
}

#[derive(Debug, Clone)]
pub enum RtGeometry {
    Triangles(RtTriangleGeometry),
    Aabbs(RtAabbGeometry),
}

#[derive(Clone)]
pub struct RtGeometryInstance {
    pub transform: RtTransform,
    pub blas: Arc<BottomLevelAs>,
    pub custom_instance_id: u32,
    pub hit_group_index: u32,
    pub mask: u8,
}

impl Debug for RtGeometryInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtGeometryInstance")
            .field("custom_instance_id", &self.custom_instance_id)
            .field("hit_group_index", &self.hit_group_index)
            .finish()
    }
}

pub trait AccelerationStructureBackendData: Downcast + Debug + Send + Sync {
    fn set_debug_name(&self, name: &str);
}
impl_downcast!(AccelerationStructureBackendData);

/// Opaque bottom-level acceleration structure over triangle or AABB
/// geometry. Built through the command list.
pub struct BottomLevelAs {
    base: ResourceBase,
    geometries: Vec<RtGeometry>,
    backend_data: Box<dyn AccelerationStructureBackendData>,
}

impl Debug for BottomLevelAs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BottomLevelAs")
            .field("name", &self.base.name())
            .field("geometry_count", &self.geometries.len())
            .finish()
    }
}

impl BottomLevelAs {
    pub fn new(
        geometries: Vec<RtGeometry>,
        backend_data: Box<dyn AccelerationStructureBackendData>,
    ) -> Self {
        assert!(
            !geometries.is_empty(),
            "a bottom-level acceleration structure needs at least one geometry"
        );
        Self {
            base: ResourceBase::default(),
            geometries,
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

    pub fn geometries(&self) -> &[RtGeometry] {
        &self.geometries
    }

    pub fn backend_data(&self) -> &dyn AccelerationStructureBackendData {
        self.backend_data.as_ref()
    }
}

/// Opaque top-level acceleration structure over BLAS instances. The
/// instance list may be rewritten between builds, up to the fixed capacity.
pub struct TopLevelAs {
    base: ResourceBase,
    max_instance_count: u32,
    instances: RwLock<Vec<RtGeometryInstance>>,
    backend_data: Box<dyn AccelerationStructureBackendData>,
}

impl Debug for TopLevelAs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopLevelAs")
            .field("name", &self.base.name())
            .field("max_instance_count", &self.max_instance_count)
            .finish()
    }
}

impl TopLevelAs {
    pub fn new(
        max_instance_count: u32,
        initial_instances: Vec<RtGeometryInstance>,
        backend_data: Box<dyn AccelerationStructureBackendData>,
    ) -> Self {
        assert!(
            initial_instances.len() as u32 <= max_instance_count,
            "instance count {} exceeds capacity {max_instance_count}",
            initial_instances.len(),
        );
        Self {
            base: ResourceBase::default(),
            max_instance_count,
            instances: RwLock::new(initial_instances),
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

    pub fn max_instance_count(&self) -> u32 {
        self.max_instance_count
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    pub fn with_instances<R>(&self, f: impl FnOnce(&[RtGeometryInstance]) -> R) -> R {
        f(&self.instances.read())
    }

    pub fn update_instances(&self, instances: Vec<RtGeometryInstance>) {
        assert!(
            instances.len() as u32 <= self.max_instance_count,
            "instance count {} exceeds capacity {}",
            instances.len(),
            self.max_instance_count,
        );
        *self.instances.write() = instances;
    }

    pub fn backend_data(&self) -> &dyn AccelerationStructureBackendData {
        self.backend_data.as_ref()
    }
}
