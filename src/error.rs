use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    /// The node answered with a JSON-RPC error object.
    #[error("{method} rejected by node ({code}): {message}")]
    RpcRejected {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Transaction {tx_hash} failed: {reason}")]
    TransactionFailed { tx_hash: String, reason: String },

    #[error("Bucket {0} not found on chain")]
    BucketNotFound(String),

    #[error("Storage request for file key {0} not found on chain")]
    StorageRequestNotFound(String),

    #[error("Chain state inconsistent: {0}")]
    ChainConsistency(String),

    #[error("Provider capability missing: {0}")]
    ProviderCapability(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Backend responded with {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Timed out waiting for {what} after {attempts} attempts ({elapsed:?})")]
    PollTimeout {
        what: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("File {file_key} reached terminal status '{status}': {reason}")]
    FileTerminal {
        file_key: String,
        status: String,
        reason: String,
    },
}

impl WorkflowError {
    /// Backend "not indexed yet" responses: HTTP 404 or a "Record not found" body.
    pub fn is_not_found(&self) -> bool {
        match self {
            WorkflowError::Backend { status, message } => {
                *status == 404 || message.contains("Record not found")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
