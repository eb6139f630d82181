//! Local entity types as the on-device store hands them out

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generate a fresh opaque storage identifier.
pub fn new_storage_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A user-created playlist with metadata, track references and images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub storage_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_dynamic: bool,
    pub source_type: i64,
    pub settings: MemorySettings,
    pub items: Vec<MemoryItem>,
}

impl Memory {
    /// A new, empty Memory with a freshly assigned storage ID.
    pub fn new() -> Self {
        Self::with_storage_id(new_storage_id())
    }

    pub fn with_storage_id(storage_id: impl Into<String>) -> Self {
        Self {
            storage_id: storage_id.into(),
            title: None,
            description: None,
            start_date: None,
            end_date: None,
            is_dynamic: false,
            source_type: 0,
            settings: MemorySettings::default(),
            items: Vec::new(),
        }
    }

    /// True when library-sync side effects should run for this Memory.
    pub fn syncs_with_library(&self) -> bool {
        self.settings.sync_with_remote_library
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

/// One-to-one settings attachment of a Memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySettings {
    pub sync_with_remote_library: bool,
}

/// Reference to a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub memory_id: String,
    /// Device-library identifier. Not portable across devices.
    pub persistent_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub album_title: String,
}

impl MemoryItem {
    pub fn match_key(&self) -> MatchKey {
        match &self.persistent_id {
            Some(id) if !id.is_empty() => MatchKey::Persistent(id.clone()),
            _ => MatchKey::Fallback {
                title: self.title.to_lowercase(),
                artist: self.artist.to_lowercase(),
                album_title: self.album_title.to_lowercase(),
            },
        }
    }
}

/// Best-effort identity of a track reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchKey {
    Persistent(String),
    Fallback {
        title: String,
        artist: String,
        album_title: String,
    },
}

/// Image owned by a Memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub storage_id: String,
    pub memory_id: String,
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(memory_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            storage_id: new_storage_id(),
            memory_id: memory_id.into(),
            data,
        }
    }
}

/// What a tombstone marks as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TombstoneKind {
    Memory,
    Image,
}

impl TombstoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TombstoneKind::Memory => "memory",
            TombstoneKind::Image => "image",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(TombstoneKind::Memory),
            "image" => Some(TombstoneKind::Image),
            _ => None,
        }
    }
}

/// Durable record of a local deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: String,
    pub kind: TombstoneKind,
    pub deleted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(persistent_id: Option<&str>) -> MemoryItem {
        MemoryItem {
            memory_id: "m1".to_string(),
            persistent_id: persistent_id.map(str::to_string),
            title: "Hey Jude".to_string(),
            artist: "The Beatles".to_string(),
            album_title: "Past Masters".to_string(),
        }
    }

    #[test]
    fn test_storage_ids_are_unique() {
        assert_ne!(Memory::new().storage_id, Memory::new().storage_id);
    }

    #[test]
    fn test_match_key_prefers_persistent_id() {
        assert_eq!(item(Some("123")).match_key(), MatchKey::Persistent("123".to_string()));
    }

    #[test]
    fn test_match_key_falls_back_case_insensitively() {
        let mut other = item(None);
        other.title = "HEY JUDE".to_string();
        assert_eq!(item(None).match_key(), other.match_key());
        assert_eq!(item(Some("")).match_key(), item(None).match_key());
    }

    #[test]
    fn test_tombstone_kind_parse() {
        assert_eq!(TombstoneKind::parse("image"), Some(TombstoneKind::Image));
        assert_eq!(TombstoneKind::parse(TombstoneKind::Memory.as_str()), Some(TombstoneKind::Memory));
        assert_eq!(TombstoneKind::parse("song"), None);
    }
}
