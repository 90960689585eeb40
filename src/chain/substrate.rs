/// Chain-state reads through the Substrate `state_getStorage` RPC.
///
/// Storage map keys are `twox128(pallet) ++ twox128(item) ++
/// blake2_128_concat(key)`; values come back as SCALE-encoded hex and are
/// decoded into the record types the workflow consumes.
use std::sync::atomic::{AtomicBool, Ordering};

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use codec::Decode;
use sp_crypto_hashing::{blake2_128, twox_128};
use tracing::info;

use super::rpc::JsonRpcClient;
use super::{BucketRecord, ChainState, StorageRequestRecord};
use crate::crypto::{BucketId, FileKey};
use crate::error::{Result, WorkflowError};

const PROVIDERS_PALLET: &str = "Providers";
const BUCKETS_ITEM: &str = "Buckets";
const FILE_SYSTEM_PALLET: &str = "FileSystem";
const STORAGE_REQUESTS_ITEM: &str = "StorageRequests";

#[derive(Debug, Decode)]
struct RawBucket {
    root: [u8; 32],
    user_id: [u8; 20],
    msp_id: Option<[u8; 32]>,
    private: bool,
    read_access_group_id: Option<u32>,
    size: u64,
    value_prop_id: [u8; 32],
}

#[derive(Debug, Decode)]
struct RawStorageRequest {
    requested_at: u32,
    expires_at: u32,
    owner: [u8; 20],
    bucket_id: [u8; 32],
    location: Vec<u8>,
    fingerprint: [u8; 32],
    size: u64,
    msp: Option<([u8; 32], bool)>,
    user_peer_ids: Vec<Vec<u8>>,
    bsps_required: u32,
    bsps_confirmed: u32,
    bsps_volunteered: u32,
    deposit_paid: u128,
}

impl From<RawBucket> for BucketRecord {
    fn from(raw: RawBucket) -> Self {
        Self {
            root: B256::from(raw.root),
            owner: Address::from(raw.user_id),
            msp_id: raw.msp_id.map(B256::from),
            private: raw.private,
            read_access_group_id: raw.read_access_group_id,
            size: raw.size,
            value_prop_id: B256::from(raw.value_prop_id),
        }
    }
}

impl From<RawStorageRequest> for StorageRequestRecord {
    fn from(raw: RawStorageRequest) -> Self {
        Self {
            requested_at: raw.requested_at,
            expires_at: raw.expires_at,
            owner: Address::from(raw.owner),
            bucket_id: B256::from(raw.bucket_id),
            location: String::from_utf8_lossy(&raw.location).into_owned(),
            fingerprint: raw.fingerprint,
            size: raw.size,
            msp: raw.msp.map(|(id, confirmed)| (B256::from(id), confirmed)),
            user_peer_ids: raw.user_peer_ids,
            bsps_required: raw.bsps_required,
            bsps_confirmed: raw.bsps_confirmed,
            bsps_volunteered: raw.bsps_volunteered,
            deposit_paid: raw.deposit_paid,
        }
    }
}

/// Storage key of `key` in a `Blake2_128Concat` storage map, 0x-hex encoded.
pub fn map_storage_key(pallet: &str, item: &str, key: &[u8]) -> String {
    let mut full = Vec::with_capacity(32 + 16 + key.len());
    full.extend_from_slice(&twox_128(pallet.as_bytes()));
    full.extend_from_slice(&twox_128(item.as_bytes()));
    full.extend_from_slice(&blake2_128(key));
    full.extend_from_slice(key);
    format!("0x{}", hex::encode(full))
}

pub struct SubstrateState {
    rpc: JsonRpcClient,
    closed: AtomicBool,
}

impl SubstrateState {
    /// `url` must be an HTTP(S) JSON-RPC endpoint.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(url)?,
            closed: AtomicBool::new(false),
        })
    }

    async fn fetch<T: Decode>(&self, storage_key: &str) -> Result<Option<T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkflowError::Rpc(
                "chain state connection already closed".into(),
            ));
        }

        let value: Option<String> = self
            .rpc
            .call("state_getStorage", serde_json::json!([storage_key]))
            .await?;

        let Some(value) = value else {
            return Ok(None);
        };

        let bytes = hex::decode(value.trim_start_matches("0x"))
            .map_err(|e| WorkflowError::Serialization(format!("storage value not hex: {e}")))?;

        T::decode(&mut bytes.as_slice())
            .map(Some)
            .map_err(|e| WorkflowError::Serialization(format!("SCALE decode failed: {e}")))
    }
}

#[async_trait]
impl ChainState for SubstrateState {
    async fn bucket(&self, bucket_id: &BucketId) -> Result<Option<BucketRecord>> {
        let key = map_storage_key(PROVIDERS_PALLET, BUCKETS_ITEM, bucket_id.as_slice());
        Ok(self.fetch::<RawBucket>(&key).await?.map(Into::into))
    }

    async fn storage_request(&self, file_key: &FileKey) -> Result<Option<StorageRequestRecord>> {
        let key = map_storage_key(FILE_SYSTEM_PALLET, STORAGE_REQUESTS_ITEM, file_key.as_slice());
        Ok(self.fetch::<RawStorageRequest>(&key).await?.map(Into::into))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(url = %self.rpc.url(), "Chain state connection closed");
        }
        Ok(())
    }
}
