//! In-flight transfer tracking
//!
//! At most one upload and one download per asset ID may run at a time. A
//! second attempt while one is in flight is skipped, not queued.

use std::sync::Arc;

use dashmap::DashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    uploading: Arc<DashSet<String>>,
    downloading: Arc<DashSet<String>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin_upload(&self, id: &str) -> Option<TransferGuard> {
        self.try_begin(Direction::Upload, id)
    }

    pub fn try_begin_download(&self, id: &str) -> Option<TransferGuard> {
        self.try_begin(Direction::Download, id)
    }

    /// Atomically claim `id`. `None` means a transfer is already running.
    pub fn try_begin(&self, direction: Direction, id: &str) -> Option<TransferGuard> {
        let set = self.set(direction);
        if set.insert(id.to_string()) {
            Some(TransferGuard {
                set: Arc::clone(set),
                id: id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_in_flight(&self, direction: Direction, id: &str) -> bool {
        self.set(direction).contains(id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.uploading.len() + self.downloading.len()
    }

    fn set(&self, direction: Direction) -> &Arc<DashSet<String>> {
        match direction {
            Direction::Upload => &self.uploading,
            Direction::Download => &self.downloading,
        }
    }
}

/// Releases its ID when dropped, whether the transfer succeeded or not.
#[derive(Debug)]
pub struct TransferGuard {
    set: Arc<DashSet<String>>,
    id: String,
}

impl TransferGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}
