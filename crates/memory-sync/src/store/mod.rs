//! Local store adapter - the on-device side of the sync
//!
//! The engine only talks to the store through [`LocalStore`]. Each call runs
//! in its own scope (one pooled connection or one map shard), so concurrent
//! orchestrator operations never share a mutation context.

pub mod schema;
pub mod migration;
pub mod sqlite;
pub mod in_memory;

pub use in_memory::InMemoryStore;
pub use migration::MigrationManager;
pub use sqlite::SqliteStore;

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::model::{Image, Memory, TombstoneKind};

pub trait LocalStore: Send + Sync {
    fn fetch_all(&self) -> anyhow::Result<Vec<Memory>>;

    fn find_by_id(&self, storage_id: &str) -> anyhow::Result<Option<Memory>>;

    /// Insert an empty Memory with the given ID, or return the existing one.
    fn create(&self, storage_id: &str) -> anyhow::Result<Memory>;

    /// Write every attribute and replace the item list.
    fn save(&self, memory: &Memory) -> anyhow::Result<()>;

    /// Delete a Memory with its items and images. Returns false when absent.
    fn delete(&self, storage_id: &str) -> anyhow::Result<bool>;

    fn images(&self, memory_id: &str) -> anyhow::Result<Vec<Image>>;

    fn find_image(&self, image_id: &str) -> anyhow::Result<Option<Image>>;

    fn save_image(&self, image: &Image) -> anyhow::Result<()>;

    fn delete_image(&self, image_id: &str) -> anyhow::Result<bool>;

    fn record_tombstone(&self, id: &str, kind: TombstoneKind) -> anyhow::Result<()>;

    fn tombstoned_ids(&self, kind: TombstoneKind) -> anyhow::Result<HashSet<String>>;

    fn remove_tombstone(&self, id: &str, kind: TombstoneKind) -> anyhow::Result<bool>;

    /// Drop tombstones recorded before `cutoff`.
    fn prune_tombstones(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize>;

    fn image_ids(&self, memory_id: &str) -> anyhow::Result<HashSet<String>> {
        Ok(self
            .images(memory_id)?
            .into_iter()
            .map(|image| image.storage_id)
            .collect())
    }

    fn is_tombstoned(&self, id: &str, kind: TombstoneKind) -> anyhow::Result<bool> {
        Ok(self.tombstoned_ids(kind)?.contains(id))
    }
}
