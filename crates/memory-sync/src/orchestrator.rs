//! Sync orchestrator - push, pull, tombstones and image reconciliation
//!
//! Every public operation is async, may run concurrently with the others and
//! reports a plain outcome. Transport failures are logged and swallowed here;
//! the next periodic or wakeup-triggered cycle retries naturally. The tracker
//! is the only mutual exclusion between operations.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::crypto::FieldCipher;
use crate::error::TransportError;
use crate::library::{FallbackLibrary, MediaLibrary};
use crate::model::{Image, Memory, TombstoneKind};
use crate::signals::{EventBus, SyncEvent};
use crate::store::{LocalStore, SqliteStore};
use crate::tracker::InFlightTracker;
use crate::transfer::{RemoteImageIds, RemoteSettings, TransferImage, TransferMemory};
use crate::transport::{HttpRemoteApi, RemoteApi};
use crate::wakeup::EchoLock;

/// Image work for one Memory, computed purely from ID sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Local images the server reports as deleted.
    pub delete: Vec<String>,
    /// Remote images missing locally and not tombstoned here.
    pub download: Vec<String>,
    /// Local images the server does not know.
    pub upload: Vec<String>,
}

impl ReconcilePlan {
    pub fn compute(
        local: &HashSet<String>,
        tombstoned: &HashSet<String>,
        remote: &RemoteImageIds,
    ) -> Self {
        let remote_ids: HashSet<&String> = remote.image_ids.iter().collect();
        let remote_deleted: HashSet<&String> = remote.deleted_image_ids.iter().collect();

        let mut delete: Vec<String> = local
            .iter()
            .filter(|id| remote_deleted.contains(id))
            .cloned()
            .collect();
        let mut download: Vec<String> = remote_ids
            .iter()
            .filter(|id| !local.contains(**id) && !tombstoned.contains(**id))
            .map(|id| (*id).clone())
            .collect();
        let mut upload: Vec<String> = local
            .iter()
            .filter(|id| !remote_ids.contains(id) && !remote_deleted.contains(id))
            .cloned()
            .collect();

        delete.sort();
        download.sort();
        upload.sort();
        Self { delete, download, upload }
    }

    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.download.is_empty() && self.upload.is_empty()
    }
}

/// What image reconciliation actually did for one Memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub deleted: Vec<String>,
    pub downloaded: Vec<String>,
    pub uploaded: Vec<String>,
}

pub struct SyncOrchestrator {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteApi>,
    library: Arc<dyn MediaLibrary>,
    cipher: FieldCipher,
    tracker: InFlightTracker,
    events: EventBus,
    echo_lock: EchoLock,
    tombstone_retention: Option<Duration>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        library: Arc<dyn MediaLibrary>,
        cipher: FieldCipher,
    ) -> Self {
        Self {
            store,
            remote,
            library,
            cipher,
            tracker: InFlightTracker::new(),
            events: EventBus::new(),
            echo_lock: EchoLock::new(),
            tombstone_retention: None,
        }
    }

    /// SQLite store, HTTP client and fallback library wired from `config`.
    pub fn from_config(config: &SyncConfig) -> anyhow::Result<Self> {
        let store = SqliteStore::open(&config.db_path)
            .with_context(|| format!("Failed to open store at {}", config.db_path.display()))?;
        let remote = HttpRemoteApi::new(config)?;
        let cipher = FieldCipher::new(&config.encryption_password, config.key_salt());

        Ok(Self::new(Arc::new(store), Arc::new(remote), Arc::new(FallbackLibrary), cipher)
            .with_tombstone_retention_days(config.tombstone_retention_days))
    }

    pub fn with_tombstone_retention_days(mut self, days: Option<u32>) -> Self {
        self.tombstone_retention = days.map(|days| Duration::days(i64::from(days)));
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn tracker(&self) -> &InFlightTracker {
        &self.tracker
    }

    pub fn echo_lock(&self) -> &EchoLock {
        &self.echo_lock
    }

    // ===== Account =====

    pub async fn authenticate(&self) -> bool {
        let result = self.remote.authenticate().await;
        self.report("authenticate", result.map_err(Into::into)).is_some()
    }

    pub async fn register_device_token(&self, token: &str) -> bool {
        let result = self.remote.register_device_token(token).await;
        self.report("register device token", result.map_err(Into::into))
            .is_some()
    }

    // ===== Memories =====

    /// Push every local Memory. Each push is independent; returns true when
    /// all of them succeeded.
    pub async fn push_all(&self) -> bool {
        let memories = match self.report("push all", self.store.fetch_all()) {
            Some(memories) => memories,
            None => return false,
        };

        let total = memories.len();
        let results = join_all(memories.iter().map(|memory| self.push(memory, false))).await;
        let failed = results.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            warn!("Pushed {} of {} memories", total - failed, total);
        } else {
            info!("Pushed {} memories", total);
        }
        failed == 0
    }

    /// Push one Memory. With `send_wakeup` the server notifies the account's
    /// other devices, and the echo lock is armed for the wakeup that comes
    /// back to this one.
    pub async fn push(&self, memory: &Memory, send_wakeup: bool) -> bool {
        match self.store.is_tombstoned(&memory.storage_id, TombstoneKind::Memory) {
            Ok(true) => {
                debug!("Skipping push of deleted memory {}", memory.storage_id);
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                self.report::<()>("push", Err(e));
                return false;
            }
        }

        let transfer = TransferMemory::from_local(memory, &self.cipher);
        let result = self.remote.post_memory(&transfer, send_wakeup).await;
        let ok = self
            .report("push", result.map_err(Into::into))
            .is_some();
        if ok {
            if send_wakeup {
                self.echo_lock.arm();
            }
            debug!("Pushed memory {}", memory.storage_id);
        }
        ok
    }

    /// Pull the remote state into the local store, then reconcile images.
    pub async fn pull_all(&self, trigger_dependent_update: bool) -> bool {
        let result = self.pull_metadata().await;
        if self.report("pull", result).is_none() {
            return false;
        }

        let memories = match self.report("pull", self.store.fetch_all()) {
            Some(memories) => memories,
            None => return false,
        };
        join_all(
            memories
                .iter()
                .map(|memory| self.reconcile_images(&memory.storage_id)),
        )
        .await;

        self.events.emit(SyncEvent::SyncCompleted);
        if trigger_dependent_update {
            self.events.emit(SyncEvent::DependentUpdateRequested);
        }
        true
    }

    /// Upserts and remote deletes. Finishes completely before any image work.
    async fn pull_metadata(&self) -> anyhow::Result<()> {
        self.prune_tombstones()?;

        let remote = self.remote.retrieve_memories().await?;
        let mut applied = 0usize;
        for transfer in remote {
            // Checked per record: a delete may land while the pull is running.
            if self.store.is_tombstoned(&transfer.storage_id, TombstoneKind::Memory)? {
                debug!("Not resurrecting deleted memory {}", transfer.storage_id);
                continue;
            }
            let memory = transfer.to_local(self.store.as_ref(), self.library.as_ref(), &self.cipher)?;
            if memory.syncs_with_library() {
                self.library.mirror_playlist(&memory);
            }
            applied += 1;
        }

        let deleted = self.remote.retrieve_deleted_memories().await?;
        let mut removed = 0usize;
        for storage_id in &deleted {
            if self.store.delete(storage_id)? {
                removed += 1;
            }
        }

        info!("Pull applied {} memories and removed {}", applied, removed);
        Ok(())
    }

    fn prune_tombstones(&self) -> anyhow::Result<()> {
        if let Some(retention) = self.tombstone_retention {
            let pruned = self.store.prune_tombstones(Utc::now() - retention)?;
            debug!("Tombstone retention pruned {} entries", pruned);
        }
        Ok(())
    }

    /// Delete a Memory everywhere. The tombstone is durable before the local
    /// delete runs, so a concurrent pull cannot bring the record back.
    pub async fn delete(&self, storage_id: &str) -> bool {
        if let Err(e) = self.store.record_tombstone(storage_id, TombstoneKind::Memory) {
            error!("Failed to record tombstone for {}: {:#}", storage_id, e);
            return false;
        }

        let result = self.remote.delete_memory(storage_id).await;
        let remote_ok = self
            .report("delete", result.map_err(Into::into))
            .is_some();

        let local_ok = self.report("delete", self.store.delete(storage_id)).is_some();
        if local_ok {
            info!("Deleted memory {}", storage_id);
            self.events.emit(SyncEvent::SyncCompleted);
        }
        remote_ok && local_ok
    }

    /// Undelete on the server. Once confirmed, the local tombstone is
    /// cleared so the next pull brings the record back.
    pub async fn restore(&self, storage_id: &str) -> bool {
        let result = self.remote.restore_memory(storage_id).await;
        if self
            .report("restore", result.map_err(Into::into))
            .is_none()
        {
            return false;
        }

        self.report(
            "restore",
            self.store.remove_tombstone(storage_id, TombstoneKind::Memory),
        )
        .is_some()
    }

    /// Flip library sync for a Memory, save it and push it.
    pub async fn set_library_sync(&self, storage_id: &str, enabled: bool) -> bool {
        let mut memory = match self.report("set library sync", self.store.find_by_id(storage_id)) {
            Some(Some(memory)) => memory,
            Some(None) => {
                warn!("Cannot change settings of unknown memory {}", storage_id);
                return false;
            }
            None => return false,
        };

        memory.settings.sync_with_remote_library = enabled;
        if self.report("set library sync", self.store.save(&memory)).is_none() {
            return false;
        }
        if enabled {
            self.library.mirror_playlist(&memory);
        }
        self.push(&memory, true).await
    }

    // ===== Images =====

    /// Bring one Memory's images in line with the server by ID set difference.
    pub async fn reconcile_images(&self, memory_id: &str) -> Option<ReconcileOutcome> {
        let result = self.try_reconcile_images(memory_id).await;
        self.report("image reconciliation", result)
    }

    async fn try_reconcile_images(&self, memory_id: &str) -> anyhow::Result<ReconcileOutcome> {
        let remote = self.remote.retrieve_image_ids(memory_id).await?;
        let local = self.store.image_ids(memory_id)?;
        let tombstoned = self.store.tombstoned_ids(TombstoneKind::Image)?;
        let plan = ReconcilePlan::compute(&local, &tombstoned, &remote);
        if plan.is_empty() {
            return Ok(ReconcileOutcome::default());
        }
        debug!(
            "Memory {}: {} image deletes, {} downloads, {} uploads",
            memory_id,
            plan.delete.len(),
            plan.download.len(),
            plan.upload.len()
        );

        let mut outcome = ReconcileOutcome::default();
        for image_id in plan.delete {
            if self.store.delete_image(&image_id)? {
                self.events.emit(SyncEvent::SyncCompleted);
                outcome.deleted.push(image_id);
            }
        }

        let downloads = join_all(plan.download.iter().map(|image_id| async move {
            let result = self.fetch_image(memory_id, image_id).await;
            (image_id, self.report("image download", result).unwrap_or(false))
        }))
        .await;
        outcome.downloaded = downloads
            .into_iter()
            .filter(|(_, ok)| *ok)
            .map(|(id, _)| id.clone())
            .collect();

        let mut images = Vec::new();
        for image_id in &plan.upload {
            if let Some(image) = self.store.find_image(image_id)? {
                images.push(image);
            }
        }
        let uploads = join_all(images.iter().map(|image| async move {
            let result = self.send_image(image).await;
            (&image.storage_id, self.report("image upload", result).unwrap_or(false))
        }))
        .await;
        outcome.uploaded = uploads
            .into_iter()
            .filter(|(_, ok)| *ok)
            .map(|(id, _)| id.clone())
            .collect();

        Ok(outcome)
    }

    /// Fetch a single image and attach it. Skipped when already present,
    /// tombstoned here, or in flight.
    pub async fn download_image(&self, memory_id: &str, image_id: &str) -> bool {
        let result = self.fetch_image(memory_id, image_id).await;
        let ok = self.report("image download", result).unwrap_or(false);
        if ok {
            self.events.emit(SyncEvent::SyncCompleted);
        }
        ok
    }

    /// Returns whether an image was stored.
    async fn fetch_image(&self, memory_id: &str, image_id: &str) -> anyhow::Result<bool> {
        let _guard = match self.tracker.try_begin_download(image_id) {
            Some(guard) => guard,
            None => {
                debug!("Download of image {} already in flight", image_id);
                return Ok(false);
            }
        };
        if self.store.find_image(image_id)?.is_some()
            || self.store.is_tombstoned(image_id, TombstoneKind::Image)?
        {
            return Ok(false);
        }
        if self.store.find_by_id(memory_id)?.is_none() {
            debug!("Memory {} is not local yet, leaving image {} for the next pull", memory_id, image_id);
            return Ok(false);
        }

        let transfer = self.remote.download_image(memory_id, image_id).await?;
        let mut image = transfer
            .into_local(&self.cipher)
            .with_context(|| format!("Failed to decrypt image {}", image_id))?;
        image.memory_id = memory_id.to_string();

        if self.store.find_by_id(memory_id)?.is_none() {
            debug!("Memory {} vanished before image {} arrived", memory_id, image_id);
            return Ok(false);
        }
        self.store.save_image(&image)?;
        debug!("Downloaded image {} for memory {}", image_id, memory_id);
        Ok(true)
    }

    /// Store a new local image and upload it.
    pub async fn upload_image(&self, image: &Image) -> bool {
        if self.report("image upload", self.store.save_image(image)).is_none() {
            return false;
        }
        let result = self.send_image(image).await;
        self.report("image upload", result).unwrap_or(false)
    }

    /// Returns whether an upload happened.
    async fn send_image(&self, image: &Image) -> anyhow::Result<bool> {
        let _guard = match self.tracker.try_begin_upload(&image.storage_id) {
            Some(guard) => guard,
            None => {
                debug!("Upload of image {} already in flight", image.storage_id);
                return Ok(false);
            }
        };
        let transfer = TransferImage::from_local(image, &self.cipher);
        self.remote.upload_image(&transfer).await?;
        debug!("Uploaded image {} for memory {}", image.storage_id, image.memory_id);
        Ok(true)
    }

    /// Delete an image locally and on the server.
    pub async fn delete_image(&self, memory_id: &str, image_id: &str) -> bool {
        if let Err(e) = self.store.record_tombstone(image_id, TombstoneKind::Image) {
            error!("Failed to record tombstone for image {}: {:#}", image_id, e);
            return false;
        }
        let result = self.remote.delete_image(memory_id, image_id).await;
        let remote_ok = self
            .report("image delete", result.map_err(Into::into))
            .is_some();
        let local_ok = self.remove_local_image(image_id);
        remote_ok && local_ok
    }

    /// Drop an image the server reported deleted. No remote call.
    pub fn remove_local_image(&self, image_id: &str) -> bool {
        match self.report("image delete", self.store.delete_image(image_id)) {
            Some(removed) => {
                if removed {
                    self.events.emit(SyncEvent::SyncCompleted);
                }
                true
            }
            None => false,
        }
    }

    // ===== Settings =====

    pub async fn refresh_settings(&self) -> bool {
        let result = self.remote.retrieve_settings().await;
        match self.report("settings refresh", result.map_err(Into::into)) {
            Some(settings) => {
                self.events.emit(SyncEvent::SettingsRefreshed(settings));
                true
            }
            None => false,
        }
    }

    pub async fn update_settings(&self, settings: &RemoteSettings) -> bool {
        let result = self.remote.update_settings(settings).await;
        self.report("settings update", result.map_err(Into::into))
            .is_some()
    }

    /// Log a failed operation. Missing credentials are expected and only
    /// logged at debug level.
    fn report<T>(&self, operation: &str, result: anyhow::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) if is_not_authenticated(&e) => {
                debug!("{} deferred: not authenticated", operation);
                None
            }
            Err(e) => {
                warn!("{} failed: {:#}", operation, e);
                None
            }
        }
    }
}

fn is_not_authenticated(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TransportError>()
        .is_some_and(TransportError::is_not_authenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportResult;
    use crate::store::InMemoryStore;
    use crate::wakeup::{WakeupHandler, WakeupOutcome, WakeupPayload};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    // ===== Reconciliation plan =====

    #[test]
    fn test_plan_for_img_a_and_img_b() {
        let remote = RemoteImageIds {
            image_ids: vec!["imgA".into()],
            deleted_image_ids: vec!["imgB".into()],
        };
        let plan = ReconcilePlan::compute(&ids(&["imgA", "imgB"]), &HashSet::new(), &remote);
        assert_eq!(plan.delete, vec!["imgB"]);
        assert!(plan.download.is_empty());
        assert!(plan.upload.is_empty());
    }

    #[test]
    fn test_plan_skips_locally_tombstoned_downloads() {
        let remote = RemoteImageIds {
            image_ids: vec!["imgA".into(), "imgC".into()],
            deleted_image_ids: vec![],
        };
        let plan = ReconcilePlan::compute(&HashSet::new(), &ids(&["imgC"]), &remote);
        assert_eq!(plan.download, vec!["imgA"]);
    }

    proptest! {
        #[test]
        fn prop_plan_is_pure_set_difference(
            local in prop::collection::hash_set("[a-f]", 0..6),
            remote in prop::collection::hash_set("[a-f]", 0..6),
            deleted in prop::collection::hash_set("[g-k]", 0..4),
            local_extra in prop::collection::hash_set("[g-k]", 0..4),
        ) {
            // Local may hold IDs the server marked deleted.
            let local: HashSet<String> = local.union(&local_extra).cloned().collect();
            let server = RemoteImageIds {
                image_ids: remote.iter().cloned().collect(),
                deleted_image_ids: deleted.iter().cloned().collect(),
            };
            let plan = ReconcilePlan::compute(&local, &HashSet::new(), &server);

            let expected_download: HashSet<String> = remote.difference(&local).cloned().collect();
            let expected_upload: HashSet<String> = local
                .iter()
                .filter(|id| !remote.contains(*id) && !deleted.contains(*id))
                .cloned()
                .collect();
            let expected_delete: HashSet<String> = local.intersection(&deleted).cloned().collect();

            prop_assert_eq!(plan.download.into_iter().collect::<HashSet<_>>(), expected_download);
            prop_assert_eq!(plan.upload.into_iter().collect::<HashSet<_>>(), expected_upload);
            prop_assert_eq!(plan.delete.into_iter().collect::<HashSet<_>>(), expected_delete);
        }
    }

    // ===== Orchestrator against a scripted remote =====

    #[derive(Default)]
    struct ScriptedRemote {
        memories: Mutex<Vec<TransferMemory>>,
        deleted: Mutex<Vec<String>>,
        image_ids: Mutex<RemoteImageIds>,
        images: Mutex<Vec<TransferImage>>,
        calls: Mutex<Vec<String>>,
        image_id_requests: Mutex<Vec<String>>,
        fail_posts: bool,
        rejected_posts: Vec<&'static str>,
        unauthenticated: bool,
    }

    impl ScriptedRemote {
        fn call(&self, name: &str) -> TransportResult<()> {
            self.calls.lock().unwrap().push(name.to_string());
            if self.unauthenticated {
                Err(TransportError::NotAuthenticated)
            } else {
                Ok(())
            }
        }

        fn calls(&self, name: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
        }
    }

    #[async_trait]
    impl RemoteApi for ScriptedRemote {
        async fn authenticate(&self) -> TransportResult<()> {
            self.call("authenticate")
        }
        async fn register_device_token(&self, _token: &str) -> TransportResult<()> {
            self.call("registerDeviceToken")
        }
        async fn post_memory(&self, memory: &TransferMemory, _send_wakeup: bool) -> TransportResult<()> {
            self.call("postMemory")?;
            if self.fail_posts || self.rejected_posts.contains(&memory.storage_id.as_str()) {
                return Err(TransportError::Status { status: 500, body: "down".into() });
            }
            let mut memories = self.memories.lock().unwrap();
            memories.retain(|m| m.storage_id != memory.storage_id);
            memories.push(memory.clone());
            Ok(())
        }
        async fn delete_memory(&self, storage_id: &str) -> TransportResult<()> {
            self.call("deleteMemory")?;
            self.deleted.lock().unwrap().push(storage_id.to_string());
            Ok(())
        }
        async fn restore_memory(&self, _storage_id: &str) -> TransportResult<()> {
            self.call("restoreMemory")
        }
        async fn retrieve_memories(&self) -> TransportResult<Vec<TransferMemory>> {
            self.call("retrieveMemories")?;
            Ok(self.memories.lock().unwrap().clone())
        }
        async fn retrieve_deleted_memories(&self) -> TransportResult<Vec<String>> {
            self.call("retrieveDeletedMemories")?;
            Ok(self.deleted.lock().unwrap().clone())
        }
        async fn retrieve_image_ids(&self, memory_id: &str) -> TransportResult<RemoteImageIds> {
            self.call("retrieveImageIDs")?;
            self.image_id_requests.lock().unwrap().push(memory_id.to_string());
            Ok(self.image_ids.lock().unwrap().clone())
        }
        async fn upload_image(&self, image: &TransferImage) -> TransportResult<()> {
            self.call("uploadImage")?;
            self.images.lock().unwrap().push(image.clone());
            Ok(())
        }
        async fn download_image(&self, _memory_id: &str, image_id: &str) -> TransportResult<TransferImage> {
            self.call("downloadImage")?;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.images
                .lock()
                .unwrap()
                .iter()
                .find(|i| i.id == image_id)
                .cloned()
                .ok_or_else(|| TransportError::Status { status: 404, body: "missing".into() })
        }
        async fn delete_image(&self, _memory_id: &str, _image_id: &str) -> TransportResult<()> {
            self.call("deleteImage")
        }
        async fn retrieve_settings(&self) -> TransportResult<RemoteSettings> {
            self.call("retrieveSettings")?;
            let mut settings = RemoteSettings::default();
            settings.set("autoSync", "true");
            Ok(settings)
        }
        async fn update_settings(&self, _settings: &RemoteSettings) -> TransportResult<()> {
            self.call("updateSettings")
        }
    }

    fn cipher() -> FieldCipher {
        FieldCipher::with_rounds("pw", "account-1", 2)
    }

    fn orchestrator(remote: Arc<ScriptedRemote>) -> (SyncOrchestrator, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let engine = SyncOrchestrator::new(store.clone(), remote, Arc::new(FallbackLibrary), cipher());
        (engine, store)
    }

    fn titled(id: &str, title: &str) -> Memory {
        let mut memory = Memory::with_storage_id(id);
        memory.title = Some(title.to_string());
        memory
    }

    #[tokio::test]
    async fn test_push_all_continues_past_failures() {
        let remote = Arc::new(ScriptedRemote {
            fail_posts: true,
            ..Default::default()
        });
        let (engine, store) = orchestrator(remote.clone());
        store.save(&titled("a", "A")).unwrap();
        store.save(&titled("b", "B")).unwrap();

        assert!(!engine.push_all().await);
        assert_eq!(remote.calls("postMemory"), 2);
    }

    #[tokio::test]
    async fn test_push_with_wakeup_arms_echo_lock_only_on_success() {
        let remote = Arc::new(ScriptedRemote::default());
        let (engine, _) = orchestrator(remote);
        assert!(engine.push(&titled("a", "A"), true).await);
        assert!(engine.echo_lock().consume());

        let failing = Arc::new(ScriptedRemote {
            fail_posts: true,
            ..Default::default()
        });
        let (engine, _) = orchestrator(failing);
        assert!(!engine.push(&titled("a", "A"), true).await);
        assert!(!engine.echo_lock().is_armed());
    }

    #[tokio::test]
    async fn test_failed_push_keeps_lock_armed_by_earlier_push() {
        let remote = Arc::new(ScriptedRemote {
            rejected_posts: vec!["b"],
            ..Default::default()
        });
        let (engine, _) = orchestrator(remote);
        let engine = Arc::new(engine);

        assert!(engine.push(&titled("a", "A"), true).await);
        assert!(!engine.push(&titled("b", "B"), true).await);

        let handler = WakeupHandler::new(Arc::clone(&engine));
        assert_eq!(handler.handle(&WakeupPayload::default()).await, WakeupOutcome::Suppressed);
        assert!(!engine.echo_lock().is_armed());
    }

    #[tokio::test]
    async fn test_unauthenticated_operations_defer_quietly() {
        let remote = Arc::new(ScriptedRemote {
            unauthenticated: true,
            ..Default::default()
        });
        let (engine, store) = orchestrator(remote);
        store.save(&titled("a", "A")).unwrap();

        assert!(!engine.pull_all(false).await);
        assert!(!engine.push_all().await);
        assert_eq!(store.fetch_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pull_signals_once_after_metadata_and_images() {
        let remote = Arc::new(ScriptedRemote::default());
        remote
            .memories
            .lock()
            .unwrap()
            .push(TransferMemory::from_local(&titled("abc123", "Summer"), &cipher()));
        let (engine, store) = orchestrator(remote.clone());
        let mut events = engine.subscribe();

        assert!(engine.pull_all(true).await);
        assert_eq!(store.find_by_id("abc123").unwrap().unwrap().title.as_deref(), Some("Summer"));
        assert_eq!(remote.calls("retrieveImageIDs"), 1);
        assert_eq!(events.recv().await.unwrap(), SyncEvent::SyncCompleted);
        assert_eq!(events.recv().await.unwrap(), SyncEvent::DependentUpdateRequested);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_deleted_memory_is_removed_before_reconciliation() {
        let remote = Arc::new(ScriptedRemote::default());
        remote
            .memories
            .lock()
            .unwrap()
            .push(TransferMemory::from_local(&titled("keep", "Summer"), &cipher()));
        remote.deleted.lock().unwrap().push("gone".to_string());
        let (engine, store) = orchestrator(remote.clone());
        store.save(&titled("gone", "Winter")).unwrap();
        store.save_image(&Image::new("gone", b"x".to_vec())).unwrap();

        assert!(engine.pull_all(false).await);
        assert!(store.find_by_id("gone").unwrap().is_none());
        assert!(store.find_by_id("keep").unwrap().is_some());
        assert_eq!(remote.image_id_requests.lock().unwrap().as_slice(), ["keep"]);
        assert_eq!(remote.calls("uploadImage"), 0);
    }

    #[tokio::test]
    async fn test_delete_records_tombstone_before_local_delete() {
        let remote = Arc::new(ScriptedRemote::default());
        let (engine, store) = orchestrator(remote.clone());
        store.save(&titled("abc123", "Summer")).unwrap();

        assert!(engine.delete("abc123").await);
        assert!(store.is_tombstoned("abc123", TombstoneKind::Memory).unwrap());
        assert!(store.find_by_id("abc123").unwrap().is_none());
        assert_eq!(remote.deleted.lock().unwrap().as_slice(), ["abc123"]);
    }

    #[tokio::test]
    async fn test_restore_clears_tombstone_after_confirmation() {
        let remote = Arc::new(ScriptedRemote::default());
        let (engine, store) = orchestrator(remote);
        store.record_tombstone("abc123", TombstoneKind::Memory).unwrap();

        assert!(engine.restore("abc123").await);
        assert!(!store.is_tombstoned("abc123", TombstoneKind::Memory).unwrap());
    }

    #[tokio::test]
    async fn test_push_of_deleted_memory_is_skipped() {
        let remote = Arc::new(ScriptedRemote::default());
        let (engine, store) = orchestrator(remote.clone());
        store.record_tombstone("abc123", TombstoneKind::Memory).unwrap();

        assert!(!engine.push(&titled("abc123", "Summer"), false).await);
        assert_eq!(remote.calls("postMemory"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_downloads_hit_network_once() {
        let remote = Arc::new(ScriptedRemote::default());
        let image = Image {
            storage_id: "imgA".into(),
            memory_id: "abc123".into(),
            data: b"pixels".to_vec(),
        };
        remote.images.lock().unwrap().push(TransferImage::from_local(&image, &cipher()));
        let (engine, store) = orchestrator(remote.clone());
        store.save(&titled("abc123", "Summer")).unwrap();

        let (first, second) = tokio::join!(
            engine.download_image("abc123", "imgA"),
            engine.download_image("abc123", "imgA")
        );
        assert!(first ^ second);
        assert_eq!(remote.calls("downloadImage"), 1);
        assert_eq!(store.find_image("imgA").unwrap(), Some(image));
        assert_eq!(engine.tracker().in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_image_for_unknown_memory_is_not_downloaded() {
        let remote = Arc::new(ScriptedRemote::default());
        let image = Image {
            storage_id: "imgA".into(),
            memory_id: "abc123".into(),
            data: b"pixels".to_vec(),
        };
        remote.images.lock().unwrap().push(TransferImage::from_local(&image, &cipher()));
        let (engine, store) = orchestrator(remote.clone());

        assert!(!engine.download_image("abc123", "imgA").await);
        assert_eq!(remote.calls("downloadImage"), 0);
        assert_eq!(engine.tracker().in_flight_count(), 0);

        store.save(&titled("abc123", "Summer")).unwrap();
        assert!(engine.download_image("abc123", "imgA").await);
        assert!(!engine.download_image("abc123", "imgA").await);
        assert_eq!(remote.calls("downloadImage"), 1);
    }

    #[tokio::test]
    async fn test_delete_image_tombstones_and_signals() {
        let remote = Arc::new(ScriptedRemote::default());
        let (engine, store) = orchestrator(remote.clone());
        store.save(&titled("abc123", "Summer")).unwrap();
        store.save_image(&Image::new("abc123", b"x".to_vec())).unwrap();
        let image_id = store.images("abc123").unwrap()[0].storage_id.clone();
        let mut events = engine.subscribe();

        assert!(engine.delete_image("abc123", &image_id).await);
        assert!(store.is_tombstoned(&image_id, TombstoneKind::Image).unwrap());
        assert!(store.images("abc123").unwrap().is_empty());
        assert_eq!(events.recv().await.unwrap(), SyncEvent::SyncCompleted);
    }

    #[tokio::test]
    async fn test_set_library_sync_saves_and_pushes() {
        let remote = Arc::new(ScriptedRemote::default());
        let (engine, store) = orchestrator(remote.clone());
        store.save(&titled("abc123", "Summer")).unwrap();

        assert!(engine.set_library_sync("abc123", true).await);
        assert!(store.find_by_id("abc123").unwrap().unwrap().syncs_with_library());
        assert!(remote.memories.lock().unwrap()[0].sync_with_remote_library);
        assert!(!engine.set_library_sync("missing", true).await);
    }

    #[tokio::test]
    async fn test_refresh_settings_emits_settings() {
        let remote = Arc::new(ScriptedRemote::default());
        let (engine, _) = orchestrator(remote);
        let mut events = engine.subscribe();

        assert!(engine.refresh_settings().await);
        match events.recv().await.unwrap() {
            SyncEvent::SettingsRefreshed(settings) => assert_eq!(settings.get_bool("autoSync"), Some(true)),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_tombstones_are_pruned_on_pull() {
        let remote = Arc::new(ScriptedRemote::default());
        let (engine, store) = orchestrator(remote);
        let engine = engine.with_tombstone_retention_days(Some(0));
        store.record_tombstone("old", TombstoneKind::Memory).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert!(engine.pull_all(false).await);
        assert!(!store.is_tombstoned("old", TombstoneKind::Memory).unwrap());
    }
}
