use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::model::{Image, Memory, Tombstone, TombstoneKind};
use crate::store::LocalStore;

/// Process-local store. Clones share the same maps.
#[derive(Clone)]
pub struct InMemoryStore {
    memories: Arc<DashMap<String, Memory>>,
    images: Arc<DashMap<String, Image>>,
    tombstones: Arc<DashMap<(String, TombstoneKind), Tombstone>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            memories: Arc::new(DashMap::new()),
            images: Arc::new(DashMap::new()),
            tombstones: Arc::new(DashMap::new()),
        }
    }
}

impl LocalStore for InMemoryStore {
    fn fetch_all(&self) -> anyhow::Result<Vec<Memory>> {
        Ok(self.memories.iter().map(|entry| entry.value().clone()).collect())
    }

    fn find_by_id(&self, storage_id: &str) -> anyhow::Result<Option<Memory>> {
        Ok(self.memories.get(storage_id).map(|memory| memory.clone()))
    }

    fn create(&self, storage_id: &str) -> anyhow::Result<Memory> {
        let entry = self
            .memories
            .entry(storage_id.to_string())
            .or_insert_with(|| Memory::with_storage_id(storage_id));
        Ok(entry.clone())
    }

    fn save(&self, memory: &Memory) -> anyhow::Result<()> {
        self.memories.insert(memory.storage_id.clone(), memory.clone());
        Ok(())
    }

    fn delete(&self, storage_id: &str) -> anyhow::Result<bool> {
        let existed = self.memories.remove(storage_id).is_some();
        self.images.retain(|_, image| image.memory_id != storage_id);
        Ok(existed)
    }

    fn images(&self, memory_id: &str) -> anyhow::Result<Vec<Image>> {
        Ok(self
            .images
            .iter()
            .filter(|entry| entry.memory_id == memory_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn find_image(&self, image_id: &str) -> anyhow::Result<Option<Image>> {
        Ok(self.images.get(image_id).map(|image| image.clone()))
    }

    fn save_image(&self, image: &Image) -> anyhow::Result<()> {
        self.images.insert(image.storage_id.clone(), image.clone());
        Ok(())
    }

    fn delete_image(&self, image_id: &str) -> anyhow::Result<bool> {
        Ok(self.images.remove(image_id).is_some())
    }

    fn record_tombstone(&self, id: &str, kind: TombstoneKind) -> anyhow::Result<()> {
        self.tombstones
            .entry((id.to_string(), kind))
            .or_insert_with(|| Tombstone {
                id: id.to_string(),
                kind,
                deleted_at: Utc::now(),
            });
        Ok(())
    }

    fn tombstoned_ids(&self, kind: TombstoneKind) -> anyhow::Result<HashSet<String>> {
        Ok(self
            .tombstones
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.id.clone())
            .collect())
    }

    fn remove_tombstone(&self, id: &str, kind: TombstoneKind) -> anyhow::Result<bool> {
        Ok(self.tombstones.remove(&(id.to_string(), kind)).is_some())
    }

    fn prune_tombstones(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut pruned = 0usize;
        self.tombstones.retain(|_, tombstone| {
            let keep = tombstone.deleted_at >= cutoff;
            if !keep {
                pruned += 1;
            }
            keep
        });
        Ok(pruned)
    }
}
