//! Live-asset cache.
//!
//! Guarantees one [`MutableAsset`] instance per uuid: concurrent loads of
//! the same id all receive the first instance inserted. Entries beyond the
//! soft capacity are evicted least-recently-used first, but only when the
//! [`EvictionPolicy`] reports them discardable and nothing outside the cache
//! still holds the instance.

use std::sync::Arc;

use lru::LruCache;
use tracing::{debug, trace};
use uuid::Uuid;

use tripup_core::{AssetRecord, AssetRepository, AtomicVar, Result};

use crate::file_storage::AssetPaths;
use crate::mutable_asset::MutableAsset;

/// Decides whether a cached asset may be dropped.
pub trait EvictionPolicy: Send + Sync {
    fn is_discardable(&self, id: &Uuid) -> bool;
}

impl<F> EvictionPolicy for F
where
    F: Fn(&Uuid) -> bool + Send + Sync,
{
    fn is_discardable(&self, id: &Uuid) -> bool {
        self(id)
    }
}

pub struct AssetCache {
    repo: Arc<dyn AssetRepository>,
    paths: AssetPaths,
    capacity: usize,
    entries: AtomicVar<LruCache<Uuid, Arc<MutableAsset>>>,
    policy: Arc<dyn EvictionPolicy>,
}

impl AssetCache {
    pub fn new(
        repo: Arc<dyn AssetRepository>,
        paths: AssetPaths,
        capacity: usize,
        policy: Arc<dyn EvictionPolicy>,
    ) -> Self {
        Self {
            repo,
            paths,
            capacity,
            entries: AtomicVar::new(LruCache::unbounded()),
            policy,
        }
    }

    pub fn repository(&self) -> &Arc<dyn AssetRepository> {
        &self.repo
    }

    pub fn paths(&self) -> &AssetPaths {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.entries.with(|e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.with(|e| e.contains(id))
    }

    /// The live instance for `id`, loading it from the database if needed.
    ///
    /// Returns `None` when no record exists.
    pub async fn get(&self, id: Uuid) -> Result<Option<Arc<MutableAsset>>> {
        if let Some(asset) = self.entries.mutate(|e| e.get(&id).cloned()) {
            return Ok(Some(asset));
        }

        let Some(record) = self.repo.fetch(id).await? else {
            return Ok(None);
        };
        Ok(Some(self.adopt(record)))
    }

    /// Live instances for every id that exists, in input order.
    pub async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Arc<MutableAsset>>> {
        let mut assets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(asset) = self.get(*id).await? {
                assets.push(asset);
            }
        }
        Ok(assets)
    }

    /// Persist a new record and cache its live instance.
    pub async fn insert_new(&self, record: AssetRecord) -> Result<Arc<MutableAsset>> {
        self.repo.insert(&record).await?;
        Ok(self.adopt(record))
    }

    /// Drop an entry unconditionally (asset terminated).
    pub fn remove(&self, id: &Uuid) -> Option<Arc<MutableAsset>> {
        let removed = self.entries.mutate(|e| e.pop(id));
        if removed.is_some() {
            trace!(subsystem = "db", component = "cache", asset_id = %id, "Cache entry removed");
        }
        removed
    }

    /// Insert a freshly loaded record unless another task won the race.
    fn adopt(&self, record: AssetRecord) -> Arc<MutableAsset> {
        let id = record.uuid;
        let candidate = Arc::new(MutableAsset::new(record, self.repo.clone(), &self.paths));
        self.entries.mutate(|entries| {
            if let Some(existing) = entries.get(&id) {
                return existing.clone();
            }
            entries.put(id, candidate.clone());
            self.trim(entries);
            candidate
        })
    }

    fn trim(&self, entries: &mut LruCache<Uuid, Arc<MutableAsset>>) {
        let excess = entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }

        let victims: Vec<Uuid> = entries
            .iter()
            .rev()
            .filter(|(id, asset)| Arc::strong_count(asset) == 1 && self.policy.is_discardable(id))
            .map(|(id, _)| *id)
            .take(excess)
            .collect();
        for id in &victims {
            entries.pop(id);
        }

        debug!(
            subsystem = "db",
            component = "cache",
            op = "trim",
            evicted = victims.len(),
            retained = entries.len(),
            capacity = self.capacity,
            "Cache trimmed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{sample_device_asset, TestDatabase};
    use std::collections::HashSet;

    fn cache_with(db: &TestDatabase, capacity: usize, policy: Arc<dyn EvictionPolicy>) -> AssetCache {
        AssetCache::new(db.asset_repository(), AssetPaths::new("/data"), capacity, policy)
    }

    async fn stored(db: &TestDatabase, local: &str) -> Uuid {
        let record = AssetRecord::new_local(Uuid::new_v4(), &sample_device_asset(local));
        db.db.assets.insert(&record).await.unwrap();
        record.uuid
    }

    #[tokio::test]
    async fn test_get_returns_same_instance() {
        let db = TestDatabase::new().await;
        let cache = cache_with(&db, 10, Arc::new(|_: &Uuid| true));
        let id = stored(&db, "A").await;

        let a = cache.get(id).await.unwrap().unwrap();
        let b = cache.get(id).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_concurrent_get_single_instance() {
        let db = TestDatabase::new().await;
        let cache = Arc::new(cache_with(&db, 10, Arc::new(|_: &Uuid| true)));
        let id = stored(&db, "A").await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get(id).await.unwrap().unwrap() })
            })
            .collect();
        let assets = futures::future::join_all(handles).await;
        let first = assets[0].as_ref().unwrap();
        for asset in &assets {
            assert!(Arc::ptr_eq(first, asset.as_ref().unwrap()));
        }
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let db = TestDatabase::new().await;
        let cache = cache_with(&db, 10, Arc::new(|_: &Uuid| true));
        assert!(cache.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eviction_respects_policy() {
        let db = TestDatabase::new().await;
        let pinned = stored(&db, "pinned").await;
        let pinned_set: HashSet<Uuid> = [pinned].into();
        let cache = cache_with(
            &db,
            1,
            Arc::new(move |id: &Uuid| !pinned_set.contains(id)),
        );

        drop(cache.get(pinned).await.unwrap());
        let other = stored(&db, "other").await;
        drop(cache.get(other).await.unwrap());
        let third = stored(&db, "third").await;
        let _third = cache.get(third).await.unwrap();

        assert!(cache.contains(&pinned));
        assert!(!cache.contains(&other));
        assert!(cache.contains(&third));
    }

    #[tokio::test]
    async fn test_held_instances_are_not_evicted() {
        let db = TestDatabase::new().await;
        let cache = cache_with(&db, 1, Arc::new(|_: &Uuid| true));
        let a = stored(&db, "A").await;
        let b = stored(&db, "B").await;

        let held = cache.get(a).await.unwrap().unwrap();
        let _b = cache.get(b).await.unwrap().unwrap();

        assert_eq!(cache.len(), 2);
        let again = cache.get(a).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[tokio::test]
    async fn test_insert_new_and_remove() {
        let db = TestDatabase::new().await;
        let cache = cache_with(&db, 10, Arc::new(|_: &Uuid| true));
        let record = AssetRecord::new_local(Uuid::new_v4(), &sample_device_asset("N"));
        let id = record.uuid;

        let asset = cache.insert_new(record).await.unwrap();
        assert!(db.db.assets.fetch(id).await.unwrap().is_some());
        assert!(Arc::ptr_eq(&asset, &cache.get(id).await.unwrap().unwrap()));

        assert!(cache.remove(&id).is_some());
        assert!(!cache.contains(&id));
    }
}
