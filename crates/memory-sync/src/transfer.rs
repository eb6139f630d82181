//! Wire-format mirrors of the local entities
//!
//! Transfer objects never carry local store identities beyond the opaque
//! storage IDs. Sensitive Memory fields and image payloads are sealed by
//! [`FieldCipher`] before they leave the device.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::FieldCipher;
use crate::error::DecryptionError;
use crate::library::MediaLibrary;
use crate::model::{Image, Memory, MemoryItem, MemorySettings};
use crate::store::LocalStore;

/// Dates are exchanged at second precision.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMemory {
    #[serde(rename = "storageID")]
    pub storage_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "desc", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub is_dynamic: bool,
    #[serde(default)]
    pub source_type: i64,
    #[serde(default)]
    pub sync_with_remote_library: bool,
    #[serde(default)]
    pub songs: Vec<TransferSong>,
}

/// Song reference matched by `(title, album, artist)` on the receiving device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSong {
    pub title: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub artist: String,
}

impl From<&MemoryItem> for TransferSong {
    fn from(item: &MemoryItem) -> Self {
        Self {
            title: item.title.clone(),
            album: item.album_title.clone(),
            artist: item.artist.clone(),
        }
    }
}

/// Outcome of opening one sealed field.
enum Opened {
    Plain(Option<String>),
    /// Could not be decrypted; carries the ciphertext.
    Sealed(String),
}

fn open_field(cipher: &FieldCipher, storage_id: &str, name: &str, value: Option<String>) -> Opened {
    match value {
        None => Opened::Plain(None),
        Some(sealed) => match cipher.decrypt_text(&sealed) {
            Ok(plain) => Opened::Plain(Some(plain)),
            Err(e) => {
                warn!("Failed to decrypt {} of memory {}: {}", name, storage_id, e);
                Opened::Sealed(sealed)
            }
        },
    }
}

/// Unreadable or unparseable dates keep `current`.
fn open_date(
    cipher: &FieldCipher,
    storage_id: &str,
    name: &str,
    value: Option<String>,
    current: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match open_field(cipher, storage_id, name, value) {
        Opened::Plain(None) => None,
        Opened::Plain(Some(text)) => match parse_date(&text) {
            Some(date) => Some(date),
            None => {
                warn!("Unparseable {} {:?} on memory {}", name, text, storage_id);
                current
            }
        },
        Opened::Sealed(_) => current,
    }
}

impl TransferMemory {
    /// Snapshot a local Memory, sealing its sensitive fields.
    pub fn from_local(memory: &Memory, cipher: &FieldCipher) -> Self {
        Self {
            storage_id: memory.storage_id.clone(),
            title: cipher.encrypt_optional(memory.title.as_deref()),
            description: cipher.encrypt_optional(memory.description.as_deref()),
            start_date: memory.start_date.as_ref().map(|d| cipher.encrypt_text(&format_date(d))),
            end_date: memory.end_date.as_ref().map(|d| cipher.encrypt_text(&format_date(d))),
            is_dynamic: memory.is_dynamic,
            source_type: memory.source_type,
            sync_with_remote_library: memory.settings.sync_with_remote_library,
            songs: memory.items.iter().map(TransferSong::from).collect(),
        }
    }

    /// Decrypt and upsert into the local store. An existing Memory with the
    /// same storage ID is updated in place; otherwise one is created.
    ///
    /// Fields that fail to decrypt keep their last known local value, or the
    /// ciphertext when there is none.
    pub fn to_local(
        self,
        store: &dyn LocalStore,
        library: &dyn MediaLibrary,
        cipher: &FieldCipher,
    ) -> anyhow::Result<Memory> {
        let mut memory = match store.find_by_id(&self.storage_id)? {
            Some(existing) => existing,
            None => store.create(&self.storage_id)?,
        };
        let id = self.storage_id.as_str();

        memory.title = match open_field(cipher, id, "title", self.title) {
            Opened::Plain(value) => value,
            Opened::Sealed(sealed) => memory.title.take().or(Some(sealed)),
        };
        memory.description = match open_field(cipher, id, "description", self.description) {
            Opened::Plain(value) => value,
            Opened::Sealed(sealed) => memory.description.take().or(Some(sealed)),
        };
        memory.start_date = open_date(cipher, id, "start date", self.start_date, memory.start_date);
        memory.end_date = open_date(cipher, id, "end date", self.end_date, memory.end_date);

        memory.is_dynamic = self.is_dynamic;
        memory.source_type = self.source_type;
        memory.settings = MemorySettings {
            sync_with_remote_library: self.sync_with_remote_library,
        };
        memory.items = self
            .songs
            .iter()
            .map(|song| library.to_item(&memory.storage_id, song))
            .collect();

        store.save(&memory)?;
        Ok(memory)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferImage {
    pub id: String,
    #[serde(rename = "memoryID")]
    pub memory_id: String,
    /// Base64 of the sealed image bytes.
    pub payload: String,
}

impl TransferImage {
    pub fn from_local(image: &Image, cipher: &FieldCipher) -> Self {
        Self {
            id: image.storage_id.clone(),
            memory_id: image.memory_id.clone(),
            payload: STANDARD.encode(cipher.encrypt_bytes(&image.data)),
        }
    }

    pub fn into_local(self, cipher: &FieldCipher) -> Result<Image, DecryptionError> {
        let sealed = STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|_| DecryptionError::Encoding)?;
        Ok(Image {
            storage_id: self.id,
            memory_id: self.memory_id,
            data: cipher.decrypt_bytes(&sealed)?,
        })
    }
}

/// Authoritative image state of one Memory on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteImageIds {
    #[serde(rename = "imageIDs", default)]
    pub image_ids: Vec<String>,
    #[serde(rename = "deletedImageIDs", default)]
    pub deleted_image_ids: Vec<String>,
}

/// Account-level settings object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteSettings {
    pub values: BTreeMap<String, String>,
}

impl RemoteSettings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}
