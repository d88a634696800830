//! Which operations currently reference which assets.
//!
//! An asset id is present exactly while at least one registered operation
//! references it. The cache consults the registry before evicting, so an
//! asset with in-flight work is never dropped and reloaded as a second
//! instance.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use tripup_core::AtomicVar;
use tripup_db::EvictionPolicy;

use crate::queue::OperationHandle;

/// Kind of a registered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Import,
    Upload,
    Download,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Import => "import",
            OperationKind::Upload => "upload",
            OperationKind::Download => "download",
            OperationKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredOperation {
    pub kind: OperationKind,
    pub handle: OperationHandle,
}

#[derive(Debug, Default)]
pub struct OperationRegistry {
    by_asset: HashMap<Uuid, HashMap<Uuid, RegisteredOperation>>,
}

impl OperationRegistry {
    pub fn register(&mut self, kind: OperationKind, handle: &OperationHandle, assets: &[Uuid]) {
        for asset in assets {
            self.by_asset.entry(*asset).or_default().insert(
                handle.id(),
                RegisteredOperation {
                    kind,
                    handle: handle.clone(),
                },
            );
        }
    }

    /// Remove an operation. Returns the assets no operation references anymore.
    pub fn unregister(&mut self, operation_id: Uuid, assets: &[Uuid]) -> Vec<Uuid> {
        let mut freed = Vec::new();
        for asset in assets {
            if let Some(ops) = self.by_asset.get_mut(asset) {
                ops.remove(&operation_id);
                if ops.is_empty() {
                    self.by_asset.remove(asset);
                    freed.push(*asset);
                }
            }
        }
        freed
    }

    pub fn contains(&self, asset: &Uuid) -> bool {
        self.by_asset.contains_key(asset)
    }

    pub fn has_kind(&self, asset: &Uuid, kind: OperationKind) -> bool {
        self.by_asset
            .get(asset)
            .is_some_and(|ops| ops.values().any(|op| op.kind == kind))
    }

    /// Handles of operations of the given kinds referencing any of `assets`.
    pub fn handles_of(&self, assets: &[Uuid], kinds: &[OperationKind]) -> Vec<OperationHandle> {
        let mut seen = HashMap::new();
        for asset in assets {
            for (id, op) in self.by_asset.get(asset).into_iter().flatten() {
                if kinds.contains(&op.kind) {
                    seen.entry(*id).or_insert_with(|| op.handle.clone());
                }
            }
        }
        seen.into_values().collect()
    }

    /// Assets referenced by an operation of the given kind.
    pub fn assets_with_kind(&self, kind: OperationKind) -> Vec<Uuid> {
        self.by_asset
            .iter()
            .filter(|(_, ops)| ops.values().any(|op| op.kind == kind))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn asset_count(&self) -> usize {
        self.by_asset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_asset.is_empty()
    }
}

/// Cache eviction policy backed by the registry: only idle assets may go.
pub struct RegistryEvictionPolicy {
    registry: Arc<AtomicVar<OperationRegistry>>,
}

impl RegistryEvictionPolicy {
    pub fn new(registry: Arc<AtomicVar<OperationRegistry>>) -> Self {
        Self { registry }
    }
}

impl EvictionPolicy for RegistryEvictionPolicy {
    fn is_discardable(&self, id: &Uuid) -> bool {
        !self.registry.with(|r| r.contains(id))
    }
}
