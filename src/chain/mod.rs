/// Chain-side collaborators.
///
/// The workflow only talks to the chain through two traits:
/// - [`StorageChain`]: submits signed transactions (bucket creation,
///   storage requests) and waits for their receipts.
/// - [`ChainState`]: read-only queries of runtime storage (buckets and
///   pending storage requests).
///
/// Adapters:
/// - `evm`: transactions to the file-system precompile over Ethereum JSON-RPC
/// - `substrate`: `state_getStorage` reads with SCALE decoding
pub mod evm;
pub mod rpc;
pub mod substrate;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;

use crate::crypto::{BucketId, FileKey, Fingerprint};
use crate::error::Result;

pub type TxHash = B256;

/// Replication policy for a storage request. Only `Custom` is used by the
/// workflow, with an explicit replica count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplicationTarget {
    Basic = 0,
    Standard = 1,
    HighSecurity = 2,
    SuperHighSecurity = 3,
    UltraHighSecurity = 4,
    Custom = 5,
}

/// Parameters of an on-chain storage request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRequestParams {
    pub bucket_id: BucketId,
    pub location: String,
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub msp_id: B256,
    pub peer_ids: Vec<String>,
    pub replication: ReplicationTarget,
    pub replicas: u32,
}

/// Outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
}

/// A bucket as stored by the providers pallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRecord {
    pub root: B256,
    pub owner: Address,
    pub msp_id: Option<B256>,
    pub private: bool,
    pub read_access_group_id: Option<u32>,
    pub size: u64,
    pub value_prop_id: B256,
}

/// A pending storage request as stored by the file-system pallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRequestRecord {
    pub requested_at: u32,
    pub expires_at: u32,
    pub owner: Address,
    pub bucket_id: BucketId,
    pub location: String,
    pub fingerprint: Fingerprint,
    pub size: u64,
    /// Assigned MSP and whether it has confirmed storing the file.
    pub msp: Option<(B256, bool)>,
    pub user_peer_ids: Vec<Vec<u8>>,
    pub bsps_required: u32,
    pub bsps_confirmed: u32,
    pub bsps_volunteered: u32,
    pub deposit_paid: u128,
}

impl StorageRequestRecord {
    pub fn msp_confirmed(&self) -> bool {
        matches!(self.msp, Some((_, true)))
    }
}

/// Transaction-submitting side of the chain.
#[async_trait]
pub trait StorageChain: Send + Sync {
    /// Account that signs every transaction.
    fn owner(&self) -> Address;

    /// Chain id, also used when signing in to the MSP backend.
    fn chain_id(&self) -> u64;

    async fn create_bucket(
        &self,
        msp_id: B256,
        name: &str,
        private: bool,
        value_prop_id: B256,
    ) -> Result<TxHash>;

    async fn issue_storage_request(&self, request: &StorageRequestParams) -> Result<TxHash>;

    /// Wait until `tx_hash` is included. Errors if it reverted or never lands.
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt>;
}

/// Read-only view of runtime storage.
#[async_trait]
pub trait ChainState: Send + Sync {
    async fn bucket(&self, bucket_id: &BucketId) -> Result<Option<BucketRecord>>;

    async fn storage_request(&self, file_key: &FileKey) -> Result<Option<StorageRequestRecord>>;

    /// Release the connection. Queries after this fail.
    async fn close(&self) -> Result<()>;
}
