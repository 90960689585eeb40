/// End-to-end workflow orchestrator.
///
/// Runs the full storage round trip, strictly in order:
/// 1. Check the MSP backend is healthy
/// 2. Create a bucket on chain and read it back
/// 3. Wait for the backend to index the bucket
/// 4. Issue a storage request and upload the file
/// 5. Wait for the MSP to confirm the request on chain
/// 6. Wait for the backend to report the file ready
/// 7. Download the file and compare it with the original
///
/// Any failure aborts the run. The chain-state connection is closed on
/// every exit path and the backend session is logged out once opened.
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{HealthReport, HealthStatus, ProviderBackend, Session};
use crate::crypto::{BucketId, FileKey};
use crate::error::{Result, WorkflowError};
use crate::workflow::{verify_download, UploadedFile, Workflow};

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub bucket_name: String,
    /// Local file to store.
    pub file_path: PathBuf,
    /// Name of the file inside the bucket.
    pub location: String,
    /// Where the downloaded copy is written.
    pub download_path: PathBuf,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub bucket_id: BucketId,
    pub file_key: FileKey,
    /// 0x-hex fingerprint of the uploaded file.
    pub fingerprint: String,
    pub size: u64,
    pub downloaded_size: u64,
    pub content_type: Option<String>,
    /// Downloaded bytes equal the original.
    pub verified: bool,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verified
    }
}

/// Query backend health. Only an explicit `unhealthy` stops the run.
pub async fn check_health(backend: &dyn ProviderBackend) -> Result<HealthReport> {
    let report = backend.health().await?;
    match report.status {
        HealthStatus::Healthy => {
            info!(version = report.version.as_deref().unwrap_or("unknown"), "MSP backend healthy");
        }
        HealthStatus::Degraded | HealthStatus::Unknown => {
            warn!(status = ?report.status, "MSP backend not fully healthy, continuing");
        }
        HealthStatus::Unhealthy => {
            return Err(WorkflowError::ProviderUnavailable(
                "MSP backend reports unhealthy".into(),
            ));
        }
    }
    Ok(report)
}

/// Run the whole workflow, then close the chain-state connection.
///
/// A close failure fails an otherwise successful run. After a failed run
/// it is only logged so the original error is returned.
pub async fn run(workflow: &Workflow<'_>, request: &RunRequest) -> Result<RunReport> {
    let run_id = Uuid::now_v7();
    let started_at = Utc::now();
    info!(%run_id, bucket = %request.bucket_name, file = %request.file_path.display(), "Starting workflow run");

    let outcome = run_steps(workflow, request, run_id, started_at).await;
    let closed = workflow.state.close().await;

    match (outcome, closed) {
        (Ok(report), Ok(())) => {
            info!(%run_id, verified = report.verified, "Workflow run finished");
            Ok(report)
        }
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!(%run_id, error = %close_err, "Closing chain state after failed run also failed");
            Err(e)
        }
    }
}

async fn run_steps(
    workflow: &Workflow<'_>,
    request: &RunRequest,
    run_id: Uuid,
    started_at: DateTime<Utc>,
) -> Result<RunReport> {
    check_health(workflow.backend).await?;

    let bucket = workflow.create_bucket(&request.bucket_name).await?;
    workflow.verify_bucket_creation(&bucket.bucket_id).await?;
    workflow.wait_for_backend_bucket_ready(&bucket.bucket_id).await?;

    let UploadedFile {
        file_key,
        digest,
        session,
        ..
    } = workflow
        .upload_file(&bucket.bucket_id, &request.file_path, &request.location)
        .await?;

    let downloaded = after_upload(workflow, request, &session, &bucket.bucket_id, &file_key).await;
    let session_secs = (Utc::now() - session.established_at()).num_seconds();
    match workflow.backend.logout(session).await {
        Ok(()) => info!(session_secs, "Logged out of MSP backend"),
        Err(e) => warn!(error = %e, session_secs, "Logout from MSP backend failed"),
    }
    let (downloaded_size, content_type) = downloaded?;

    let verified = verify_download(&request.file_path, &request.download_path).await?;

    Ok(RunReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        bucket_id: bucket.bucket_id,
        file_key,
        fingerprint: format!("0x{}", hex::encode(digest.fingerprint)),
        size: digest.size,
        downloaded_size,
        content_type,
        verified,
    })
}

/// Steps that need the backend session.
async fn after_upload(
    workflow: &Workflow<'_>,
    request: &RunRequest,
    session: &Session,
    bucket_id: &BucketId,
    file_key: &FileKey,
) -> Result<(u64, Option<String>)> {
    workflow.wait_for_msp_confirm_on_chain(file_key).await?;
    workflow
        .wait_for_backend_file_ready(session, bucket_id, file_key)
        .await?;
    let downloaded = workflow
        .download_file(session, file_key, &request.download_path)
        .await?;
    Ok((downloaded.size, downloaded.content_type))
}
