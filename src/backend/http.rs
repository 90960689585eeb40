/// MSP backend over its HTTP API.
///
/// Routes used:
/// - `GET /health`, `GET /info`, `GET /value-props`
/// - `POST /auth/nonce`, `POST /auth/verify`, `POST /auth/logout`
/// - `GET /buckets/{bucket_id}`
/// - `PUT /buckets/{bucket_id}/upload/{file_key}` (multipart)
/// - `GET /buckets/{bucket_id}/info/{file_key}`
/// - `GET /download/{file_key}`
///
/// Uploads and downloads are streamed; neither side of a transfer is
/// held in memory.
use std::path::Path;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use codec::Encode;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{multipart, Body, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{
    BackendBucket, DownloadedFile, FileInfo, HealthReport, NonceChallenge, ProviderBackend,
    ProviderInfo, Session, UploadReceipt, ValueProposition,
};
use crate::crypto::{BucketId, FileKey, FileMetadata};
use crate::error::{Result, WorkflowError};

/// Configuration for the MSP backend client.
#[derive(Debug, Clone)]
pub struct MspConfig {
    /// Base URL of the backend (e.g., "http://127.0.0.1:8080").
    pub base_url: String,
    /// Per-request timeout. Uploads and downloads of large files need headroom.
    pub timeout: Duration,
}

impl MspConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(300),
        }
    }
}

pub struct MspHttpClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct VerifyUser {
    address: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    token: String,
    user: VerifyUser,
}

impl MspHttpClient {
    pub fn new(config: MspConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send the request; non-2xx responses become `WorkflowError::Backend`.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = resp.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), %message, "Backend request failed");
        Err(WorkflowError::Backend {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| WorkflowError::Serialization(format!("{what} response parse error: {e}")))
    }
}

#[async_trait]
impl ProviderBackend for MspHttpClient {
    async fn health(&self) -> Result<HealthReport> {
        self.json(self.client.get(self.url("/health")), "health")
            .await
    }

    async fn info(&self) -> Result<ProviderInfo> {
        self.json(self.client.get(self.url("/info")), "info").await
    }

    async fn value_props(&self) -> Result<Vec<ValueProposition>> {
        self.json(self.client.get(self.url("/value-props")), "value-props")
            .await
    }

    async fn auth_nonce(&self, address: Address, chain_id: u64) -> Result<NonceChallenge> {
        let body = serde_json::json!({
            "address": address.to_string(),
            "chainId": chain_id,
        });
        self.json(
            self.client.post(self.url("/auth/nonce")).json(&body),
            "auth nonce",
        )
        .await
    }

    async fn auth_verify(&self, message: &str, signature: &str) -> Result<Session> {
        let body = serde_json::json!({
            "message": message,
            "signature": signature,
        });
        let resp: VerifyResponse = self
            .json(
                self.client.post(self.url("/auth/verify")).json(&body),
                "auth verify",
            )
            .await
            .map_err(|e| match e {
                WorkflowError::Backend { status, message } if status == 401 => {
                    WorkflowError::Auth(message)
                }
                other => other,
            })?;

        let address: Address = resp.user.address.parse().map_err(|e| {
            WorkflowError::Auth(format!(
                "backend returned invalid address '{}': {e}",
                resp.user.address
            ))
        })?;

        Ok(Session::new(resp.token, address))
    }

    async fn logout(&self, session: Session) -> Result<()> {
        self.send(
            self.client
                .post(self.url("/auth/logout"))
                .bearer_auth(session.token()),
        )
        .await?;
        Ok(())
    }

    async fn bucket(&self, bucket_id: &BucketId) -> Result<BackendBucket> {
        self.json(
            self.client.get(self.url(&format!("/buckets/{bucket_id}"))),
            "bucket",
        )
        .await
    }

    async fn upload_file(
        &self,
        session: &Session,
        metadata: &FileMetadata,
        file_key: &FileKey,
        path: &Path,
    ) -> Result<UploadReceipt> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();

        let file_part = multipart::Part::stream_with_length(
            Body::wrap_stream(ReaderStream::new(file)),
            len,
        )
        .file_name(metadata.location.clone())
        .mime_str("application/octet-stream")?;

        let metadata_part = multipart::Part::bytes(metadata.encode())
            .file_name("file_metadata")
            .mime_str("application/octet-stream")?;

        let form = multipart::Form::new()
            .part("file_metadata", metadata_part)
            .part("file", file_part);

        let url = self.url(&format!(
            "/buckets/{}/upload/{file_key}",
            metadata.bucket_id
        ));
        self.json(
            self.client
                .put(url)
                .bearer_auth(session.token())
                .multipart(form),
            "upload",
        )
        .await
    }

    async fn file_info(
        &self,
        session: &Session,
        bucket_id: &BucketId,
        file_key: &FileKey,
    ) -> Result<FileInfo> {
        self.json(
            self.client
                .get(self.url(&format!("/buckets/{bucket_id}/info/{file_key}")))
                .bearer_auth(session.token()),
            "file info",
        )
        .await
    }

    async fn download_file(
        &self,
        session: &Session,
        file_key: &FileKey,
        dest: &Path,
    ) -> Result<DownloadedFile> {
        let resp = self
            .send(
                self.client
                    .get(self.url(&format!("/download/{file_key}")))
                    .bearer_auth(session.token()),
            )
            .await?;

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let size = tokio::fs::metadata(dest).await?.len();

        Ok(DownloadedFile {
            path: dest.to_path_buf(),
            size,
            content_type,
        })
    }
}
