/// File lifecycle: storage request, upload, confirmation, readiness, download.
use std::path::Path;

use libp2p::multiaddr::{Multiaddr, Protocol};
use tracing::{debug, info, warn};

use super::Workflow;
use crate::backend::{
    sign_in, DownloadedFile, FileInfo, Readiness, Session, UploadReceipt, UploadStatus,
};
use crate::chain::{ReplicationTarget, StorageRequestParams, StorageRequestRecord, TxReceipt};
use crate::crypto::{BucketId, FileDigest, FileKey, FileMetadata};
use crate::error::{Result, WorkflowError};
use crate::poll::{poll_until, PollStatus};

/// A file accepted by the MSP backend.
///
/// Owns the session opened for the upload. Later steps borrow it and the
/// caller hands it back to [`ProviderBackend::logout`](crate::backend::ProviderBackend::logout).
#[derive(Debug)]
pub struct UploadedFile {
    pub file_key: FileKey,
    pub metadata: FileMetadata,
    pub digest: FileDigest,
    pub storage_request: TxReceipt,
    pub receipt: UploadReceipt,
    pub session: Session,
}

impl Workflow<'_> {
    /// Request storage for the file at `path` and upload it to the MSP.
    ///
    /// `location` is the file's name inside the bucket.
    pub async fn upload_file(
        &self,
        bucket_id: &BucketId,
        path: &Path,
        location: &str,
    ) -> Result<UploadedFile> {
        let digest = self.fingerprinter.fingerprint_file(path).await?;
        info!(
            path = %path.display(),
            size = digest.size,
            scheme = self.fingerprinter.scheme(),
            fingerprint = %hex::encode(digest.fingerprint),
            "Fingerprinted file"
        );

        let provider = self.backend.info().await?;
        let msp_id = provider.provider_id()?;
        let peer_ids = peer_ids_from_multiaddrs(&provider.multiaddresses)?;

        let request = StorageRequestParams {
            bucket_id: *bucket_id,
            location: location.to_string(),
            fingerprint: digest.fingerprint,
            size: digest.size,
            msp_id,
            peer_ids,
            replication: ReplicationTarget::Custom,
            replicas: self.config.replicas,
        };
        let tx_hash = self.chain.issue_storage_request(&request).await?;
        let storage_request = self.chain.wait_for_receipt(tx_hash).await?;

        let metadata = FileMetadata {
            owner: self.chain.owner(),
            bucket_id: *bucket_id,
            location: location.to_string(),
            size: digest.size,
            fingerprint: digest.fingerprint,
        };
        let file_key = metadata.file_key();
        info!(file_key = %file_key, tx_hash = %storage_request.tx_hash, "Storage request issued");

        self.check_storage_request(&file_key, &metadata).await?;

        let session = sign_in(self.backend, self.identity, self.chain.chain_id()).await?;

        let receipt = match self
            .backend
            .upload_file(&session, &metadata, &file_key, path)
            .await
            .and_then(|receipt| match receipt.status {
                UploadStatus::UploadSuccessful => Ok(receipt),
                UploadStatus::Other => Err(WorkflowError::UploadFailed(format!(
                    "backend did not confirm upload of {file_key}"
                ))),
            }) {
            Ok(receipt) => receipt,
            Err(e) => {
                if let Err(logout_err) = self.backend.logout(session).await {
                    warn!(error = %logout_err, "Logout after failed upload failed");
                }
                return Err(e);
            }
        };

        if let Some(echoed) = receipt.file_key.as_deref() {
            if !echoed.eq_ignore_ascii_case(&file_key.to_string()) {
                warn!(expected = %file_key, echoed, "Backend echoed a different file key");
            }
        }

        info!(file_key = %file_key, location, "File uploaded");
        Ok(UploadedFile {
            file_key,
            metadata,
            digest,
            storage_request,
            receipt,
            session,
        })
    }

    /// The on-chain request must describe the file we are about to upload.
    async fn check_storage_request(
        &self,
        file_key: &FileKey,
        metadata: &FileMetadata,
    ) -> Result<()> {
        let record = self
            .state
            .storage_request(file_key)
            .await?
            .ok_or_else(|| WorkflowError::StorageRequestNotFound(file_key.to_string()))?;

        if record.bucket_id != metadata.bucket_id {
            return Err(WorkflowError::ChainConsistency(format!(
                "storage request {file_key} is in bucket {} instead of {}",
                record.bucket_id, metadata.bucket_id
            )));
        }
        if record.fingerprint != metadata.fingerprint {
            return Err(WorkflowError::ChainConsistency(format!(
                "storage request {file_key} has fingerprint {} instead of {}",
                hex::encode(record.fingerprint),
                hex::encode(metadata.fingerprint)
            )));
        }
        Ok(())
    }

    /// Poll chain state until the MSP has confirmed the storage request.
    pub async fn wait_for_msp_confirm_on_chain(
        &self,
        file_key: &FileKey,
    ) -> Result<StorageRequestRecord> {
        let state = self.state;
        let file_key = *file_key;
        let what = format!("MSP to confirm storage request {file_key}");

        let record = poll_until(&self.config.msp_confirmation, &what, move |attempt| async move {
            let record = match state.storage_request(&file_key).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    return Err(WorkflowError::StorageRequestNotFound(file_key.to_string()))
                }
                Err(e) => return Err(e),
            };
            if record.msp_confirmed() {
                Ok(PollStatus::Ready(record))
            } else {
                debug!(attempt, "MSP has not confirmed yet");
                Ok(PollStatus::Pending)
            }
        })
        .await?;

        info!(file_key = %file_key, "MSP confirmed storage request on chain");
        Ok(record)
    }

    /// Poll the backend until it reports the file ready to serve.
    pub async fn wait_for_backend_file_ready(
        &self,
        session: &Session,
        bucket_id: &BucketId,
        file_key: &FileKey,
    ) -> Result<FileInfo> {
        let backend = self.backend;
        let bucket_id = *bucket_id;
        let file_key = *file_key;
        let what = format!("backend to report file {file_key} ready");

        let info = poll_until(&self.config.file_ready, &what, move |attempt| async move {
            let info = match backend.file_info(session, &bucket_id, &file_key).await {
                Ok(info) => info,
                Err(e) if e.is_not_found() => return Ok(PollStatus::Pending),
                Err(e) => return Err(e),
            };
            match info.status.readiness() {
                Readiness::Ready => Ok(PollStatus::Ready(info)),
                Readiness::Terminal(reason) => Err(WorkflowError::FileTerminal {
                    file_key: file_key.to_string(),
                    status: info.status.to_string(),
                    reason: reason.to_string(),
                }),
                Readiness::Waiting => {
                    debug!(attempt, status = %info.status, "File not ready yet");
                    Ok(PollStatus::Pending)
                }
            }
        })
        .await?;

        info!(file_key = %file_key, "File ready on backend");
        Ok(info)
    }

    /// Download the file to `dest`.
    pub async fn download_file(
        &self,
        session: &Session,
        file_key: &FileKey,
        dest: &Path,
    ) -> Result<DownloadedFile> {
        let downloaded = self.backend.download_file(session, file_key, dest).await?;
        info!(
            file_key = %file_key,
            path = %downloaded.path.display(),
            size = downloaded.size,
            content_type = downloaded.content_type.as_deref().unwrap_or("unknown"),
            "File downloaded"
        );
        Ok(downloaded)
    }
}

/// Byte-for-byte comparison of two files.
///
/// A mismatch is a `false` verdict, not an error. Only I/O failures error.
pub async fn verify_download(original: &Path, downloaded: &Path) -> Result<bool> {
    let original_len = tokio::fs::metadata(original).await?.len();
    let downloaded_len = tokio::fs::metadata(downloaded).await?.len();
    if original_len != downloaded_len {
        warn!(original_len, downloaded_len, "Downloaded size differs");
        return Ok(false);
    }

    let (expected, actual) = tokio::try_join!(tokio::fs::read(original), tokio::fs::read(downloaded))?;
    let matches = expected == actual;
    if matches {
        info!(size = original_len, "Downloaded file matches original");
    } else {
        warn!(size = original_len, "Downloaded content differs");
    }
    Ok(matches)
}

/// Peer ids of the provider, taken from the trailing `/p2p/` component of
/// each multiaddress. Relayed addresses carry the relay's id first.
///
/// Unparseable addresses are skipped. Fails if the list is empty or none
/// of the addresses carries a peer id.
pub fn peer_ids_from_multiaddrs(addrs: &[String]) -> Result<Vec<String>> {
    if addrs.is_empty() {
        return Err(WorkflowError::ProviderCapability(
            "multiaddresses missing".to_string(),
        ));
    }

    let mut peer_ids: Vec<String> = Vec::new();
    for raw in addrs {
        let addr: Multiaddr = match raw.parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(addr = %raw, error = %e, "Skipping invalid multiaddress");
                continue;
            }
        };
        let peer = addr
            .iter()
            .filter_map(|proto| match proto {
                Protocol::P2p(peer) => Some(peer.to_string()),
                _ => None,
            })
            .last();
        if let Some(peer) = peer {
            if !peer_ids.contains(&peer) {
                peer_ids.push(peer);
            }
        }
    }

    if peer_ids.is_empty() {
        return Err(WorkflowError::ProviderCapability(
            "no peer ID found".to_string(),
        ));
    }
    Ok(peer_ids)
}
