pub mod file_key;
pub mod hash;

pub use file_key::{derive_bucket_id, BucketId, FileKey, FileMetadata};
pub use hash::{Blake3Fingerprinter, FileDigest, Fingerprint, Fingerprinter};
