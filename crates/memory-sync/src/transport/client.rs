//! HTTP implementation of [`RemoteApi`]
//!
//! Builds an envelope per call and executes it with reqwest. Status-string
//! responses must contain the success marker; JSON responses are decoded into
//! transfer types.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{TransportError, TransportResult};
use crate::transfer::{RemoteImageIds, RemoteSettings, TransferImage, TransferMemory};
use crate::transport::envelope::{Credentials, EnvelopeBuilder, Method, Operation};
use crate::transport::RemoteApi;

/// Marker the server puts in every successful status response.
pub const SUCCESS_MARKER: &str = "Successfully";

pub struct HttpRemoteApi {
    builder: EnvelopeBuilder,
    credentials: RwLock<Option<Credentials>>,
    http_client: reqwest::Client,
}

impl HttpRemoteApi {
    pub fn new(config: &SyncConfig) -> anyhow::Result<Self> {
        let builder = EnvelopeBuilder::new(&config.api_base_url, config.api_key.clone())?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .unwrap_or_default();
        info!("Remote API client initialized with base URL: {}", config.api_base_url);
        Ok(Self {
            builder,
            credentials: RwLock::new(config.credentials()),
            http_client,
        })
    }

    /// Install or clear the account credentials.
    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        match self.credentials.write() {
            Ok(mut guard) => *guard = credentials,
            Err(poisoned) => *poisoned.into_inner() = credentials,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.current_credentials().is_some()
    }

    fn current_credentials(&self) -> Option<Credentials> {
        match self.credentials.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Execute one operation and return the raw response body.
    async fn execute(
        &self,
        operation: Operation,
        params: BTreeMap<String, String>,
        payload: Option<String>,
    ) -> TransportResult<String> {
        if let Some((key, _)) = params.iter().find(|(k, v)| k.ends_with("ID") && v.is_empty()) {
            return Err(TransportError::InvalidRequest(format!("{} must not be empty", key)));
        }

        let credentials = self.current_credentials();
        let envelope = self
            .builder
            .build(credentials.as_ref(), operation, &params, payload.as_deref())
            .ok_or(TransportError::NotAuthenticated)?;

        debug!("Sending {} request", operation);
        let request = match envelope.method {
            Method::Get => self.http_client.get(envelope.url),
            Method::Post => self
                .http_client
                .post(envelope.url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(envelope.body.unwrap_or_default()),
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("{} returned {}", operation, status);
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn execute_status(
        &self,
        operation: Operation,
        params: BTreeMap<String, String>,
        payload: Option<String>,
    ) -> TransportResult<()> {
        let body = self.execute(operation, params, payload).await?;
        expect_success(operation, &body)
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        operation: Operation,
        params: BTreeMap<String, String>,
    ) -> TransportResult<T> {
        let body = self.execute(operation, params, None).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn expect_success(operation: Operation, body: &str) -> TransportResult<()> {
    if body.contains(SUCCESS_MARKER) {
        Ok(())
    } else {
        Err(TransportError::Rejected {
            operation: operation.to_string(),
            message: body.trim().to_string(),
        })
    }
}

fn params<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn authenticate(&self) -> TransportResult<()> {
        self.execute_status(Operation::Authenticate, BTreeMap::new(), None).await
    }

    async fn register_device_token(&self, token: &str) -> TransportResult<()> {
        self.execute_status(Operation::RegisterDeviceToken, params([("deviceToken", token)]), None)
            .await
    }

    async fn post_memory(&self, memory: &TransferMemory, send_wakeup: bool) -> TransportResult<()> {
        let payload = serde_json::to_string(memory)?;
        let send_push = if send_wakeup { "true" } else { "false" };
        self.execute_status(
            Operation::PostMemory,
            params([("storageID", memory.storage_id.as_str()), ("sendPush", send_push)]),
            Some(payload),
        )
        .await
    }

    async fn delete_memory(&self, storage_id: &str) -> TransportResult<()> {
        self.execute_status(Operation::DeleteMemory, params([("storageID", storage_id)]), None)
            .await
    }

    async fn restore_memory(&self, storage_id: &str) -> TransportResult<()> {
        self.execute_status(Operation::RestoreMemory, params([("storageID", storage_id)]), None)
            .await
    }

    async fn retrieve_memories(&self) -> TransportResult<Vec<TransferMemory>> {
        self.execute_json(Operation::RetrieveMemories, BTreeMap::new()).await
    }

    async fn retrieve_deleted_memories(&self) -> TransportResult<Vec<String>> {
        self.execute_json(Operation::RetrieveDeletedMemories, BTreeMap::new()).await
    }

    async fn retrieve_image_ids(&self, memory_id: &str) -> TransportResult<RemoteImageIds> {
        self.execute_json(Operation::RetrieveImageIDs, params([("memoryID", memory_id)]))
            .await
    }

    async fn upload_image(&self, image: &TransferImage) -> TransportResult<()> {
        let payload = serde_json::to_string(image)?;
        self.execute_status(
            Operation::UploadImage,
            params([("memoryID", image.memory_id.as_str()), ("imageID", image.id.as_str())]),
            Some(payload),
        )
        .await
    }

    async fn download_image(&self, memory_id: &str, image_id: &str) -> TransportResult<TransferImage> {
        self.execute_json(
            Operation::DownloadImage,
            params([("memoryID", memory_id), ("imageID", image_id)]),
        )
        .await
    }

    async fn delete_image(&self, memory_id: &str, image_id: &str) -> TransportResult<()> {
        self.execute_status(
            Operation::DeleteImage,
            params([("memoryID", memory_id), ("imageID", image_id)]),
            None,
        )
        .await
    }

    async fn retrieve_settings(&self) -> TransportResult<RemoteSettings> {
        self.execute_json(Operation::RetrieveSettings, BTreeMap::new()).await
    }

    async fn update_settings(&self, settings: &RemoteSettings) -> TransportResult<()> {
        self.execute_status(Operation::UpdateSettings, settings.values.clone(), None)
            .await
    }
}
