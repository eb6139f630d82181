//! Authenticated request envelopes for the remote API

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;
use url::{form_urlencoded, Url};

/// Query keys carrying authentication; caller parameters may not override them.
const RESERVED_PARAMS: [&str; 3] = ["apiKey", "appleID", "password"];

/// Remote operations the engine can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Authenticate,
    RegisterDeviceToken,
    PostMemory,
    DeleteMemory,
    RestoreMemory,
    RetrieveMemories,
    RetrieveDeletedMemories,
    RetrieveImageIDs,
    UploadImage,
    DownloadImage,
    DeleteImage,
    RetrieveSettings,
    UpdateSettings,
}

impl Operation {
    /// Endpoint path below the API base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Operation::Authenticate => "authenticate",
            Operation::RegisterDeviceToken => "registerDeviceToken",
            Operation::PostMemory => "postMemory",
            Operation::DeleteMemory => "deleteMemory",
            Operation::RestoreMemory => "restoreMemory",
            Operation::RetrieveMemories => "retrieveMemories",
            Operation::RetrieveDeletedMemories => "retrieveDeletedMemories",
            Operation::RetrieveImageIDs => "retrieveImageIDs",
            Operation::UploadImage => "uploadImage",
            Operation::DownloadImage => "downloadImage",
            Operation::DeleteImage => "deleteImage",
            Operation::RetrieveSettings => "retrieveSettings",
            Operation::UpdateSettings => "updateSettings",
        }
    }

    /// Operations that carry a `payload=` body.
    pub fn carries_payload(&self) -> bool {
        matches!(self, Operation::PostMemory | Operation::UploadImage)
    }

    pub fn method(&self) -> Method {
        if self.carries_payload() {
            Method::Post
        } else {
            Method::Get
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Account identity attached to every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account_id: String,
    pub auth_token: String,
}

impl Credentials {
    pub fn new(account_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            auth_token: auth_token.into(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.account_id.is_empty() && !self.auth_token.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("auth_token", &"***")
            .finish()
    }
}

/// A fully authenticated request, ready for the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub operation: Operation,
    pub method: Method,
    pub url: Url,
    /// Form-encoded `payload=...` body.
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    base_url: Url,
    api_key: String,
}

impl EnvelopeBuilder {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid API base URL {}: {}", base_url, e))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow::anyhow!("API base URL {} cannot carry paths", base_url));
        }
        Ok(Self {
            base_url,
            api_key: api_key.into(),
        })
    }

    /// Build the request for `operation`. Returns `None` without complete
    /// credentials.
    pub fn build(
        &self,
        credentials: Option<&Credentials>,
        operation: Operation,
        params: &BTreeMap<String, String>,
        payload: Option<&str>,
    ) -> Option<RequestEnvelope> {
        let credentials = credentials.filter(|c| c.is_complete())?;

        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(operation.path());
        }
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("apiKey", &self.api_key)
                .append_pair("appleID", &credentials.account_id)
                .append_pair("password", &credentials.auth_token);
            for (key, value) in params {
                if RESERVED_PARAMS.contains(&key.as_str()) {
                    warn!("Dropping parameter {} on {}: reserved for authentication", key, operation.path());
                    continue;
                }
                query.append_pair(key, value);
            }
        }

        let body = payload.map(|payload| {
            let encoded: String = form_urlencoded::byte_serialize(payload.as_bytes()).collect();
            format!("payload={}", encoded)
        });

        Some(RequestEnvelope {
            operation,
            method: operation.method(),
            url,
            body,
        })
    }
}
