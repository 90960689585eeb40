/// Content fingerprinting for files about to be stored.
///
/// Files are hashed as a stream so large uploads never have to be held in
/// memory. The fingerprint scheme sits behind [`Fingerprinter`] so a
/// network-specific implementation can be swapped in without touching the
/// workflow.
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::Result;

pub type Fingerprint = [u8; 32];

const READ_CHUNK: usize = 64 * 1024;

/// Fingerprint and size of a local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDigest {
    pub fingerprint: Fingerprint,
    pub size: u64,
}

#[async_trait]
pub trait Fingerprinter: Send + Sync {
    /// Human-readable scheme name, used in logs.
    fn scheme(&self) -> &str;

    async fn fingerprint_file(&self, path: &Path) -> Result<FileDigest>;
}

/// BLAKE3 over the raw file bytes.
///
/// Not the Merkle-trie root a StorageHub MSP computes over file chunks, so
/// keys derived from it are rejected by a real provider. Supply another
/// [`Fingerprinter`] to talk to one.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Fingerprinter;

#[async_trait]
impl Fingerprinter for Blake3Fingerprinter {
    fn scheme(&self) -> &str {
        "blake3"
    }

    async fn fingerprint_file(&self, path: &Path) -> Result<FileDigest> {
        let mut file = File::open(path).await?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; READ_CHUNK];
        let mut size = 0u64;

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }

        Ok(FileDigest {
            fingerprint: hasher.finalize().into(),
            size,
        })
    }
}

/// BLAKE3 of an in-memory buffer. Matches [`Blake3Fingerprinter`] for the same bytes.
pub fn hash(data: &[u8]) -> Fingerprint {
    blake3::hash(data).into()
}
