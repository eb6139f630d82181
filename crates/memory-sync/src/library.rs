//! Media-library lookup interface
//!
//! Track identifiers are device-local, so pulled songs are matched against
//! the device library by `(title, artist, album)`.

use crate::model::{Memory, MemoryItem};
use crate::transfer::TransferSong;

pub trait MediaLibrary: Send + Sync {
    /// Device identifier of the track best matching `song`, if any.
    fn resolve(&self, song: &TransferSong) -> Option<String>;

    /// Mirror a Memory into the device's own playlist library. Runs only for
    /// Memories whose settings enable library sync.
    fn mirror_playlist(&self, _memory: &Memory) {}

    /// Build the local item for a pulled song.
    fn to_item(&self, memory_id: &str, song: &TransferSong) -> MemoryItem {
        MemoryItem {
            memory_id: memory_id.to_string(),
            persistent_id: self.resolve(song),
            title: song.title.clone(),
            artist: song.artist.clone(),
            album_title: song.album.clone(),
        }
    }
}

/// Library that never finds a device track. Items keep their fallback
/// `(title, artist, album)` identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackLibrary;

impl MediaLibrary for FallbackLibrary {
    fn resolve(&self, _song: &TransferSong) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MatchKey;

    struct OneTrackLibrary;

    impl MediaLibrary for OneTrackLibrary {
        fn resolve(&self, song: &TransferSong) -> Option<String> {
            (song.title.eq_ignore_ascii_case("yesterday")).then(|| "pid-42".to_string())
        }
    }

    fn song(title: &str) -> TransferSong {
        TransferSong {
            title: title.to_string(),
            album: "Help!".to_string(),
            artist: "The Beatles".to_string(),
        }
    }

    #[test]
    fn test_resolved_song_gets_persistent_identity() {
        let item = OneTrackLibrary.to_item("m1", &song("Yesterday"));
        assert_eq!(item.match_key(), MatchKey::Persistent("pid-42".to_string()));
        assert_eq!(item.memory_id, "m1");
    }

    #[test]
    fn test_unresolved_song_keeps_fallback_identity() {
        let item = FallbackLibrary.to_item("m1", &song("Help!"));
        assert_eq!(item.persistent_id, None);
        assert_eq!(item.album_title, "Help!");
    }
}
