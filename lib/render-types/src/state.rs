use atomic_enum::atomic_enum;

/// Last-known GPU state of a resource, cached on the resource itself and
/// only ever written by the recording thread. The command list compares
/// against this to emit the minimal transition barriers.
#[atomic_enum]
#[derive(Default, PartialEq, Eq, Hash)]
pub enum ResourceState {
    #[default]
    Undefined,
    TransferSrc,
    TransferDst,
    ShaderRead,
    StorageReadWrite,
    ColorAttachment,
    DepthStencilAttachment,
    Present,
    VertexAndConstantBuffer,
    IndexBuffer,
    IndirectArgument,
    AccelerationStructure,
}

impl ResourceState {
    /// States reachable by fixed-function reads; a write barrier is never
    /// needed when transitioning between two of these.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::TransferSrc
                | Self::ShaderRead
                | Self::VertexAndConstantBuffer
                | Self::IndexBuffer
                | Self::IndirectArgument
        )
    }
}
