//! SQLite-backed local store

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::model::{Image, Memory, MemoryItem, MemorySettings, TombstoneKind};
use crate::store::{migration::MigrationManager, LocalStore};

pub struct SqliteStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening memory store at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        info!("Memory store initialized successfully");
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Private in-memory database. A single pooled connection, since every
    /// `:memory:` connection is its own database.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self { pool: Arc::new(pool) })
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
        let start_date: Option<String> = row.get(3)?;
        let end_date: Option<String> = row.get(4)?;
        Ok(Memory {
            storage_id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            start_date: start_date.as_deref().and_then(parse_timestamp),
            end_date: end_date.as_deref().and_then(parse_timestamp),
            is_dynamic: row.get(5)?,
            source_type: row.get(6)?,
            settings: MemorySettings {
                sync_with_remote_library: row.get(7)?,
            },
            items: Vec::new(),
        })
    }

    fn load_items(conn: &Connection, memory: &mut Memory) -> rusqlite::Result<()> {
        let mut stmt = conn.prepare_cached(
            "SELECT persistent_id, title, artist, album_title
             FROM memory_items WHERE memory_id = ?1 ORDER BY position",
        )?;
        let memory_id = memory.storage_id.clone();
        let items = stmt
            .query_map([&memory_id], |row| {
                Ok(MemoryItem {
                    memory_id: memory_id.clone(),
                    persistent_id: row.get(0)?,
                    title: row.get(1)?,
                    artist: row.get(2)?,
                    album_title: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        memory.items = items;
        Ok(())
    }

    fn row_to_image(row: &Row<'_>) -> rusqlite::Result<Image> {
        Ok(Image {
            storage_id: row.get(0)?,
            memory_id: row.get(1)?,
            data: row.get(2)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Fixed-width so tombstone timestamps compare correctly as text.
fn tombstone_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const MEMORY_COLUMNS: &str = "storage_id, title, description, start_date, end_date,
     is_dynamic, source_type, sync_with_remote_library";

impl LocalStore for SqliteStore {
    fn fetch_all(&self) -> anyhow::Result<Vec<Memory>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM memories ORDER BY storage_id",
            MEMORY_COLUMNS
        ))?;
        let mut memories = stmt
            .query_map([], Self::row_to_memory)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for memory in memories.iter_mut() {
            Self::load_items(&conn, memory)?;
        }
        debug!("Fetched {} memories", memories.len());
        Ok(memories)
    }

    fn find_by_id(&self, storage_id: &str) -> anyhow::Result<Option<Memory>> {
        let conn = self.get_conn()?;
        let memory = conn
            .query_row(
                &format!("SELECT {} FROM memories WHERE storage_id = ?1", MEMORY_COLUMNS),
                [storage_id],
                Self::row_to_memory,
            )
            .optional()?;
        match memory {
            Some(mut memory) => {
                Self::load_items(&conn, &mut memory)?;
                Ok(Some(memory))
            }
            None => Ok(None),
        }
    }

    fn create(&self, storage_id: &str) -> anyhow::Result<Memory> {
        {
            let conn = self.get_conn()?;
            conn.execute(
                "INSERT OR IGNORE INTO memories (storage_id) VALUES (?1)",
                [storage_id],
            )?;
        }
        self.find_by_id(storage_id)?
            .with_context(|| format!("memory {} vanished after insert", storage_id))
    }

    fn save(&self, memory: &Memory) -> anyhow::Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO memories
             (storage_id, title, description, start_date, end_date, is_dynamic, source_type, sync_with_remote_library)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(storage_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                is_dynamic = excluded.is_dynamic,
                source_type = excluded.source_type,
                sync_with_remote_library = excluded.sync_with_remote_library",
            params![
                memory.storage_id,
                memory.title,
                memory.description,
                memory.start_date.map(|d| d.to_rfc3339()),
                memory.end_date.map(|d| d.to_rfc3339()),
                memory.is_dynamic,
                memory.source_type,
                memory.settings.sync_with_remote_library,
            ],
        )?;

        tx.execute("DELETE FROM memory_items WHERE memory_id = ?1", [&memory.storage_id])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO memory_items
                 (memory_id, position, persistent_id, title, artist, album_title)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, item) in memory.items.iter().enumerate() {
                stmt.execute(params![
                    memory.storage_id,
                    position as i64,
                    item.persistent_id,
                    item.title,
                    item.artist,
                    item.album_title,
                ])?;
            }
        }

        tx.commit()?;
        debug!("Saved memory {} ({} items)", memory.storage_id, memory.items.len());
        Ok(())
    }

    fn delete(&self, storage_id: &str) -> anyhow::Result<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM memory_items WHERE memory_id = ?1", [storage_id])?;
        tx.execute("DELETE FROM images WHERE memory_id = ?1", [storage_id])?;
        let deleted = tx.execute("DELETE FROM memories WHERE storage_id = ?1", [storage_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn images(&self, memory_id: &str) -> anyhow::Result<Vec<Image>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT storage_id, memory_id, data FROM images WHERE memory_id = ?1 ORDER BY storage_id",
        )?;
        let images = stmt
            .query_map([memory_id], Self::row_to_image)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }

    fn image_ids(&self, memory_id: &str) -> anyhow::Result<HashSet<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare_cached("SELECT storage_id FROM images WHERE memory_id = ?1")?;
        let ids = stmt
            .query_map([memory_id], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(ids)
    }

    fn find_image(&self, image_id: &str) -> anyhow::Result<Option<Image>> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(
                "SELECT storage_id, memory_id, data FROM images WHERE storage_id = ?1",
                [image_id],
                Self::row_to_image,
            )
            .optional()?)
    }

    fn save_image(&self, image: &Image) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO images (storage_id, memory_id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(storage_id) DO UPDATE SET memory_id = excluded.memory_id, data = excluded.data",
            params![image.storage_id, image.memory_id, image.data],
        )
        .with_context(|| format!("failed to save image {}", image.storage_id))?;
        Ok(())
    }

    fn delete_image(&self, image_id: &str) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        Ok(conn.execute("DELETE FROM images WHERE storage_id = ?1", [image_id])? > 0)
    }

    fn record_tombstone(&self, id: &str, kind: TombstoneKind) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO tombstones (id, kind, deleted_at) VALUES (?1, ?2, ?3)",
            params![id, kind.as_str(), tombstone_timestamp(Utc::now())],
        )?;
        Ok(())
    }

    fn tombstoned_ids(&self, kind: TombstoneKind) -> anyhow::Result<HashSet<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare_cached("SELECT id FROM tombstones WHERE kind = ?1")?;
        let ids = stmt
            .query_map([kind.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(ids)
    }

    fn is_tombstoned(&self, id: &str, kind: TombstoneKind) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(
                "SELECT 1 FROM tombstones WHERE id = ?1 AND kind = ?2",
                [id, kind.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn remove_tombstone(&self, id: &str, kind: TombstoneKind) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        Ok(conn.execute(
            "DELETE FROM tombstones WHERE id = ?1 AND kind = ?2",
            [id, kind.as_str()],
        )? > 0)
    }

    fn prune_tombstones(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let pruned = conn.execute(
            "DELETE FROM tombstones WHERE deleted_at < ?1",
            [tombstone_timestamp(cutoff)],
        )?;
        if pruned > 0 {
            info!("Pruned {} tombstones older than {}", pruned, cutoff);
        }
        Ok(pruned)
    }
}
