use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Identifies which registry owns a resource; used to catch resources
/// published through a registry that does not own them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryId(pub u64);

impl RegistryId {
    pub const NONE: Self = Self(0);

    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// State every GPU resource carries besides its backend payload: a debug
/// name and the owning registry.
#[derive(Debug, Default)]
pub struct ResourceBase {
    name: RwLock<String>,
    owner_registry: AtomicU64,
}

impl ResourceBase {
    pub fn with_name(name: &str) -> Self {
        Self {
            name: RwLock::new(name.to_string()),
            owner_registry: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    pub fn owner_registry(&self) -> RegistryId {
        RegistryId(self.owner_registry.load(Ordering::Relaxed))
    }

    pub fn set_owner_registry(&self, id: RegistryId) {
        self.owner_registry.store(id.0, Ordering::Relaxed);
    }
}
