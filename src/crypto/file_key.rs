/// Deterministic identifiers shared with the chain.
///
/// Both are blake2-256 over SCALE encodings, so the client and the runtime
/// arrive at the same value independently:
/// - bucket id: `owner ++ name`
/// - file key: the encoded [`FileMetadata`] (owner, bucket, location, size, fingerprint)
use alloy::primitives::{Address, B256};
use codec::{Compact, Encode};
use sp_crypto_hashing::blake2_256;

use super::hash::Fingerprint;

pub type BucketId = B256;
pub type FileKey = B256;

/// Bucket id for `name` owned by `owner`.
pub fn derive_bucket_id(owner: &Address, name: &str) -> BucketId {
    let mut preimage = Vec::with_capacity(20 + 5 + name.len());
    preimage.extend_from_slice(owner.as_slice());
    name.as_bytes().encode_to(&mut preimage);
    B256::from(blake2_256(&preimage))
}

/// Metadata binding a file's content to its owner, bucket and location.
///
/// The SCALE encoding of this struct is both the file key preimage and the
/// `file_metadata` part sent with an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub owner: Address,
    pub bucket_id: BucketId,
    pub location: String,
    pub size: u64,
    pub fingerprint: Fingerprint,
}

impl Encode for FileMetadata {
    fn encode_to<T: codec::Output + ?Sized>(&self, dest: &mut T) {
        self.owner.as_slice().to_vec().encode_to(dest);
        self.bucket_id.as_slice().to_vec().encode_to(dest);
        self.location.as_bytes().to_vec().encode_to(dest);
        Compact(self.size).encode_to(dest);
        self.fingerprint.encode_to(dest);
    }
}

impl FileMetadata {
    pub fn file_key(&self) -> FileKey {
        B256::from(blake2_256(&self.encode()))
    }
}
