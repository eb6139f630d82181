//! SQLite schema for the local Memory store

/// Statement-level migrations, applied in order by [`super::MigrationManager`].
pub const MIGRATIONS: &[(i32, &str)] = &[(1, SCHEMA_V1)];

const SCHEMA_V1: &str = "
-- Memories table
CREATE TABLE IF NOT EXISTS memories (
    storage_id TEXT PRIMARY KEY,
    title TEXT,
    description TEXT,
    start_date TEXT,
    end_date TEXT,
    is_dynamic BOOLEAN NOT NULL DEFAULT FALSE,
    source_type INTEGER NOT NULL DEFAULT 0,
    sync_with_remote_library BOOLEAN NOT NULL DEFAULT FALSE
);
-- Track references, ordered within their Memory
CREATE TABLE IF NOT EXISTS memory_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    persistent_id TEXT,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    album_title TEXT NOT NULL,
    FOREIGN KEY (memory_id) REFERENCES memories(storage_id) ON DELETE CASCADE
);
-- Images
CREATE TABLE IF NOT EXISTS images (
    storage_id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL,
    data BLOB NOT NULL,
    FOREIGN KEY (memory_id) REFERENCES memories(storage_id) ON DELETE CASCADE
);
-- Deleted Memory and image IDs, kept so a pull cannot resurrect them
CREATE TABLE IF NOT EXISTS tombstones (
    id TEXT NOT NULL,
    kind TEXT NOT NULL,
    deleted_at TEXT NOT NULL,
    PRIMARY KEY (id, kind)
);
CREATE INDEX IF NOT EXISTS idx_memory_items_memory ON memory_items (memory_id, position);
CREATE INDEX IF NOT EXISTS idx_images_memory ON images (memory_id);
CREATE INDEX IF NOT EXISTS idx_tombstones_deleted_at ON tombstones (deleted_at);
";
