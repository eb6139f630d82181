//! Remote API surface of the sync engine

pub mod client;
pub mod envelope;

pub use client::HttpRemoteApi;
pub use envelope::{Credentials, EnvelopeBuilder, Method, Operation, RequestEnvelope};

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::transfer::{RemoteImageIds, RemoteSettings, TransferImage, TransferMemory};

/// The server as the orchestrator sees it. Each call is one request; there
/// are no retries at this layer.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn authenticate(&self) -> TransportResult<()>;

    async fn register_device_token(&self, token: &str) -> TransportResult<()>;

    /// Upsert by storage ID. `send_wakeup` asks the server to notify the
    /// account's other devices.
    async fn post_memory(&self, memory: &TransferMemory, send_wakeup: bool) -> TransportResult<()>;

    async fn delete_memory(&self, storage_id: &str) -> TransportResult<()>;

    async fn restore_memory(&self, storage_id: &str) -> TransportResult<()>;

    async fn retrieve_memories(&self) -> TransportResult<Vec<TransferMemory>>;

    /// The server's authoritative deleted-ID list.
    async fn retrieve_deleted_memories(&self) -> TransportResult<Vec<String>>;

    async fn retrieve_image_ids(&self, memory_id: &str) -> TransportResult<RemoteImageIds>;

    async fn upload_image(&self, image: &TransferImage) -> TransportResult<()>;

    async fn download_image(&self, memory_id: &str, image_id: &str) -> TransportResult<TransferImage>;

    async fn delete_image(&self, memory_id: &str, image_id: &str) -> TransportResult<()>;

    async fn retrieve_settings(&self) -> TransportResult<RemoteSettings>;

    async fn update_settings(&self, settings: &RemoteSettings) -> TransportResult<()>;
}
