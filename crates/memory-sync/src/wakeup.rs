//! Push wakeup handling
//!
//! The server wakes devices with a small JSON payload. Each wakeup is routed
//! to one orchestrator action; a wakeup this device caused itself is dropped
//! once through the echo lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::orchestrator::SyncOrchestrator;

/// Single-use flag that swallows exactly one incoming wakeup.
#[derive(Debug, Default)]
pub struct EchoLock {
    armed: AtomicBool,
}

impl EchoLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Returns true, and resets, when armed.
    pub fn consume(&self) -> bool {
        self.armed.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionCode {
    ImageUploaded,
    ImageDeleted,
    SettingsChanged,
    /// Absent or unrecognised code.
    FullSync,
}

impl ActionCode {
    pub fn parse(code: Option<&str>) -> Self {
        match code {
            Some("imageUploaded") => ActionCode::ImageUploaded,
            Some("imageDeleted") => ActionCode::ImageDeleted,
            Some("settingsChanged") => ActionCode::SettingsChanged,
            Some(other) => {
                debug!("Unrecognised action code {}, falling back to full sync", other);
                ActionCode::FullSync
            }
            None => ActionCode::FullSync,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WakeupPayload {
    #[serde(rename = "actionCode", default)]
    pub action_code: Option<String>,
    #[serde(rename = "memoryID", default)]
    pub memory_id: Option<String>,
    #[serde(rename = "imageID", default)]
    pub image_id: Option<String>,
}

impl WakeupPayload {
    /// Parse a raw payload. Anything unreadable becomes an empty payload,
    /// which routes to a full sync.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Unreadable wakeup payload ({}), treating as full sync", e);
                Self::default()
            }
        }
    }

    pub fn action(&self) -> ActionCode {
        ActionCode::parse(self.action_code.as_deref())
    }

    fn image_target(&self) -> Option<(&str, &str)> {
        match (self.memory_id.as_deref(), self.image_id.as_deref()) {
            (Some(memory), Some(image)) if !memory.is_empty() && !image.is_empty() => Some((memory, image)),
            _ => None,
        }
    }
}

/// What a wakeup led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupOutcome {
    /// Dropped by the echo lock.
    Suppressed,
    /// Image action without its IDs.
    Ignored,
    Handled { success: bool },
}

pub struct WakeupHandler {
    orchestrator: Arc<SyncOrchestrator>,
}

impl WakeupHandler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn handle_raw(&self, raw: &str) -> WakeupOutcome {
        self.handle(&WakeupPayload::parse(raw)).await
    }

    pub async fn handle(&self, payload: &WakeupPayload) -> WakeupOutcome {
        if self.orchestrator.echo_lock().consume() {
            debug!("Suppressed echo wakeup {:?}", payload.action_code);
            return WakeupOutcome::Suppressed;
        }

        let action = payload.action();
        info!("Handling wakeup: {:?}", action);
        let success = match action {
            ActionCode::ImageUploaded => match payload.image_target() {
                Some((memory_id, image_id)) => self.orchestrator.download_image(memory_id, image_id).await,
                None => return ignored(&action),
            },
            ActionCode::ImageDeleted => match payload.image_target() {
                Some((_, image_id)) => self.orchestrator.remove_local_image(image_id),
                None => return ignored(&action),
            },
            ActionCode::SettingsChanged => self.orchestrator.refresh_settings().await,
            ActionCode::FullSync => self.orchestrator.pull_all(true).await,
        };
        WakeupOutcome::Handled { success }
    }
}

fn ignored(action: &ActionCode) -> WakeupOutcome {
    warn!("Wakeup {:?} is missing memoryID or imageID, ignoring", action);
    WakeupOutcome::Ignored
}
