/// Off-chain storage provider (MSP) backend.
///
/// The MSP backend indexes chain events, accepts file uploads for storage
/// requests assigned to its provider, and serves files back once they are
/// stored. The workflow reaches it only through [`ProviderBackend`].
pub mod http;
pub mod session;

use std::path::{Path, PathBuf};

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use serde::Deserialize;

use crate::crypto::{BucketId, FileKey, FileMetadata};
use crate::error::{Result, WorkflowError};

pub use session::{sign_in, Session};

/// Backend health as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(default)]
    pub version: Option<String>,
}

/// Self-reported provider identity and network addresses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub msp_id: String,
    #[serde(default)]
    pub multiaddresses: Vec<String>,
    #[serde(default)]
    pub owner_account: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ProviderInfo {
    pub fn provider_id(&self) -> Result<B256> {
        self.msp_id.parse().map_err(|e| {
            WorkflowError::Serialization(format!("Invalid MSP id '{}': {e}", self.msp_id))
        })
    }
}

/// Pricing/capacity offer a bucket is created under.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueProposition {
    pub id: String,
    #[serde(default)]
    pub price_per_giga_unit_of_data_per_block: Option<serde_json::Value>,
    #[serde(default)]
    pub data_limit_per_bucket_bytes: Option<serde_json::Value>,
    #[serde(default = "available_by_default")]
    pub is_available: bool,
}

fn available_by_default() -> bool {
    true
}

impl ValueProposition {
    pub fn value_prop_id(&self) -> Result<B256> {
        self.id.parse().map_err(|e| {
            WorkflowError::Serialization(format!("Invalid value proposition id '{}': {e}", self.id))
        })
    }
}

/// Sign-in challenge to be signed by the caller's account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceChallenge {
    pub message: String,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Backend's view of a bucket.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendBucket {
    pub bucket_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub file_count: Option<u64>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    UploadSuccessful,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub status: UploadStatus,
    #[serde(default)]
    pub file_key: Option<String>,
    #[serde(default)]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Availability of a file as tracked by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileStatus {
    #[serde(alias = "inProgress")]
    Pending,
    Ready,
    Revoked,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

/// What a [`FileStatus`] means for someone waiting on the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Will never become ready; carries the reason.
    Terminal(&'static str),
    Waiting,
}

impl FileStatus {
    pub fn readiness(self) -> Readiness {
        match self {
            FileStatus::Ready => Readiness::Ready,
            FileStatus::Revoked => Readiness::Terminal("cancelled by user"),
            FileStatus::Rejected => Readiness::Terminal("rejected by MSP"),
            FileStatus::Expired => Readiness::Terminal("replication deadline missed"),
            FileStatus::Pending | FileStatus::Unknown => Readiness::Waiting,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Ready => "ready",
            FileStatus::Revoked => "revoked",
            FileStatus::Rejected => "rejected",
            FileStatus::Expired => "expired",
            FileStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub file_key: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub uploaded_at: Option<String>,
    pub status: FileStatus,
}

/// A file written to disk by a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub size: u64,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ProviderBackend: Send + Sync {
    async fn health(&self) -> Result<HealthReport>;

    async fn info(&self) -> Result<ProviderInfo>;

    async fn value_props(&self) -> Result<Vec<ValueProposition>>;

    async fn auth_nonce(&self, address: Address, chain_id: u64) -> Result<NonceChallenge>;

    async fn auth_verify(&self, message: &str, signature: &str) -> Result<Session>;

    /// End the session. Consumes it so it cannot be reused.
    async fn logout(&self, session: Session) -> Result<()>;

    /// Bucket as known to the backend's indexer. Unknown buckets are a 404.
    async fn bucket(&self, bucket_id: &BucketId) -> Result<BackendBucket>;

    /// Upload the file at `path`. The location in `metadata` is used as file name.
    async fn upload_file(
        &self,
        session: &Session,
        metadata: &FileMetadata,
        file_key: &FileKey,
        path: &Path,
    ) -> Result<UploadReceipt>;

    async fn file_info(
        &self,
        session: &Session,
        bucket_id: &BucketId,
        file_key: &FileKey,
    ) -> Result<FileInfo>;

    /// Stream the file to `dest`, fully flushed before returning.
    async fn download_file(
        &self,
        session: &Session,
        file_key: &FileKey,
        dest: &Path,
    ) -> Result<DownloadedFile>;
}
