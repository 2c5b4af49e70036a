/// Strongly-typed resource handles: a plain u64 index into a resource pool,
/// with one distinct type per resource kind so indices cannot cross over
/// between pools by accident.
#[macro_export]
macro_rules! define_resource_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const INVALID: Self = Self(u64::MAX);

            pub const fn from_index(index: u64) -> Self {
                Self(index)
            }

            pub const fn index(&self) -> u64 {
                self.0
            }

            pub const fn is_valid(&self) -> bool {
                self.0 != u64::MAX
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }
    };
}

define_resource_handle!(BufferHandle);
define_resource_handle!(TextureHandle);
define_resource_handle!(SamplerHandle);
define_resource_handle!(RenderTargetHandle);
define_resource_handle!(BindingSetHandle);
define_resource_handle!(RenderStateHandle);
define_resource_handle!(ComputeStateHandle);
define_resource_handle!(RayTracingStateHandle);
define_resource_handle!(BlasHandle);
define_resource_handle!(TlasHandle);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_default_to_invalid() {
        assert!(!BufferHandle::default().is_valid());
        assert!(BufferHandle::from_index(0).is_valid());
        assert_eq!(TextureHandle::from_index(42).index(), 42);
    }
}
