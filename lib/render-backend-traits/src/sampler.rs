use std::fmt::Debug;

use downcast_rs::{impl_downcast, Downcast};
use render_types::texture::{Filters, MipmapMode, WrapModes};

use crate::resource::ResourceBase;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDescription {
    pub wrap_modes: WrapModes,
    pub filters: Filters,
    pub mipmap_mode: MipmapMode,
}

pub trait SamplerBackendData: Downcast + Debug + Send + Sync {
    fn set_debug_name(&self, name: &str);
}
impl_downcast!(SamplerBackendData);

pub struct Sampler {
    base: ResourceBase,
    desc: SamplerDescription,
    backend_data: Box<dyn SamplerBackendData>,
}

impl Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler").field("desc", &self.desc).finish()
    }
}

impl Sampler {
    pub fn new(desc: SamplerDescription, backend_data: Box<dyn SamplerBackendData>) -> Self {
        Self {
            base: ResourceBase::default(),
            desc,
            backend_data,
        }
    }

    pub fn base(&self) -> &ResourceBase {
        &self.base
    }

    pub fn description(&self) -> &SamplerDescription {
        &self.desc
    }

    pub fn set_name(&self, name: &str) {
        self.base.set_name(name);
        self.backend_data.set_debug_name(name);
    }

    pub fn backend_data(&self) -> &dyn SamplerBackendData {
        self.backend_data.as_ref()
    }
}
