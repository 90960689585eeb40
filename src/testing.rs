/// In-memory chain and MSP backend for workflow tests.
///
/// `FakeChain` plays both the transaction side and the state side over one
/// shared ledger. `FakeBackend` indexes that same ledger, so a bucket is
/// only visible to the backend once it exists on the fake chain.
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use alloy::primitives::{keccak256, Address, Signature, B256};
use async_trait::async_trait;
use tempfile::TempDir;

use crate::backend::{
    BackendBucket, DownloadedFile, FileInfo, FileStatus, HealthReport, HealthStatus,
    NonceChallenge, ProviderBackend, ProviderInfo, Session, UploadReceipt, UploadStatus,
    ValueProposition,
};
use crate::chain::evm::UNSENT_TX;
use crate::chain::{
    BucketRecord, ChainState, StorageChain, StorageRequestParams, StorageRequestRecord, TxHash,
    TxReceipt,
};
use crate::crypto::{derive_bucket_id, Blake3Fingerprinter, BucketId, FileKey, FileMetadata};
use crate::error::{Result, WorkflowError};
use crate::identity::Identity;
use crate::workflow::{FirstAvailable, Workflow, WorkflowConfig};

// Well-known development keys (Alith, Baltathar).
pub const ALITH_KEY: &str = "0x5fb92d6e98884f76de468fa3f6278f8807c48bebc13595d45af5bdc4da702133";
pub const BALTATHAR_KEY: &str =
    "0x8075991ce870b93a8870eca0c0f91913d12f47948ca0fd25b49c6fa7cdbeee8b";

pub const PEER_A: &str = "QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ";
pub const PEER_B: &str = "QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN";

pub const CHAIN_ID: u64 = 1337;

#[derive(Default)]
struct Ledger {
    block: u64,
    nonce: u64,
    txs: HashMap<TxHash, u64>,
    buckets: HashMap<BucketId, (String, BucketRecord)>,
    requests: HashMap<FileKey, StorageRequestRecord>,
    last_request: Option<StorageRequestParams>,
    hold_confirmation: bool,
    confirm_countdown: HashMap<FileKey, u32>,
    drop_countdown: HashMap<FileKey, u32>,
    request_reads: u32,
    corrupt_fingerprints: bool,
    closed: bool,
    close_calls: u32,
    fail_close: bool,
}

impl Ledger {
    /// Include a transaction in the next block, returning its hash.
    fn submit(&mut self) -> TxHash {
        self.nonce += 1;
        self.block += 1;
        let hash = keccak256(self.nonce.to_be_bytes());
        self.txs.insert(hash, self.block);
        hash
    }
}

#[derive(Clone)]
pub struct FakeChain {
    owner: Address,
    ledger: Arc<Mutex<Ledger>>,
}

impl FakeChain {
    fn new(owner: Address) -> Self {
        Self {
            owner,
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    pub fn bucket_name(&self, bucket_id: &BucketId) -> Option<String> {
        let ledger = self.ledger.lock().unwrap();
        ledger.buckets.get(bucket_id).map(|(name, _)| name.clone())
    }

    pub fn last_storage_request(&self) -> Option<StorageRequestParams> {
        self.ledger.lock().unwrap().last_request.clone()
    }

    /// Store future storage requests with a fingerprint that differs from the request.
    pub fn corrupt_storage_request_fingerprints(&self) {
        self.ledger.lock().unwrap().corrupt_fingerprints = true;
    }

    /// The MSP confirms `file_key` on the `reads`-th state read from now.
    pub fn confirm_after(&self, file_key: FileKey, reads: u32) {
        let mut ledger = self.ledger.lock().unwrap();
        if let Some(record) = ledger.requests.get_mut(&file_key) {
            record.msp = record.msp.map(|(id, _)| (id, false));
        }
        ledger.confirm_countdown.insert(file_key, reads);
    }

    /// The MSP never confirms anything, including requests already issued.
    pub fn never_confirm(&self) {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.hold_confirmation = true;
        ledger.confirm_countdown.clear();
        for record in ledger.requests.values_mut() {
            record.msp = record.msp.map(|(id, _)| (id, false));
        }
    }

    /// The request for `file_key` is gone from state on the `reads`-th read from now.
    pub fn drop_request_after(&self, file_key: FileKey, reads: u32) {
        self.ledger
            .lock()
            .unwrap()
            .drop_countdown
            .insert(file_key, reads);
    }

    /// Storage-request reads served so far.
    pub fn request_reads(&self) -> u32 {
        self.ledger.lock().unwrap().request_reads
    }

    pub fn fail_close(&self) {
        self.ledger.lock().unwrap().fail_close = true;
    }

    pub fn is_closed(&self) -> bool {
        self.ledger.lock().unwrap().closed
    }

    pub fn close_calls(&self) -> u32 {
        self.ledger.lock().unwrap().close_calls
    }

    fn ensure_open(ledger: &Ledger) -> Result<()> {
        if ledger.closed {
            return Err(WorkflowError::Rpc("chain state connection already closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageChain for FakeChain {
    fn owner(&self) -> Address {
        self.owner
    }

    fn chain_id(&self) -> u64 {
        CHAIN_ID
    }

    async fn create_bucket(
        &self,
        msp_id: B256,
        name: &str,
        private: bool,
        value_prop_id: B256,
    ) -> Result<TxHash> {
        let mut ledger = self.ledger.lock().unwrap();
        let bucket_id = derive_bucket_id(&self.owner, name);

        // Like a real node, a duplicate reverts during gas estimation.
        if ledger.buckets.contains_key(&bucket_id) {
            return Err(WorkflowError::TransactionFailed {
                tx_hash: UNSENT_TX.to_string(),
                reason: "eth_estimateGas: execution reverted: BucketAlreadyExists".into(),
            });
        }

        ledger.buckets.insert(
            bucket_id,
            (
                name.to_string(),
                BucketRecord {
                    root: B256::ZERO,
                    owner: self.owner,
                    msp_id: Some(msp_id),
                    private,
                    read_access_group_id: None,
                    size: 0,
                    value_prop_id,
                },
            ),
        );
        Ok(ledger.submit())
    }

    async fn issue_storage_request(&self, request: &StorageRequestParams) -> Result<TxHash> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.last_request = Some(request.clone());

        let owns_bucket = ledger
            .buckets
            .get(&request.bucket_id)
            .is_some_and(|(_, bucket)| bucket.owner == self.owner);
        if !owns_bucket {
            return Err(WorkflowError::TransactionFailed {
                tx_hash: UNSENT_TX.to_string(),
                reason: "eth_estimateGas: execution reverted: NotBucketOwner".into(),
            });
        }

        let file_key = FileMetadata {
            owner: self.owner,
            bucket_id: request.bucket_id,
            location: request.location.clone(),
            size: request.size,
            fingerprint: request.fingerprint,
        }
        .file_key();

        let mut fingerprint = request.fingerprint;
        if ledger.corrupt_fingerprints {
            fingerprint[0] ^= 0xff;
        }
        let confirmed = !ledger.hold_confirmation;
        let block = ledger.block as u32;

        ledger.requests.insert(
            file_key,
            StorageRequestRecord {
                requested_at: block,
                expires_at: block + 100,
                owner: self.owner,
                bucket_id: request.bucket_id,
                location: request.location.clone(),
                fingerprint,
                size: request.size,
                msp: Some((request.msp_id, confirmed)),
                user_peer_ids: request.peer_ids.iter().map(|p| p.as_bytes().to_vec()).collect(),
                bsps_required: request.replicas,
                bsps_confirmed: 0,
                bsps_volunteered: 0,
                deposit_paid: 0,
            },
        );
        Ok(ledger.submit())
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt> {
        let ledger = self.ledger.lock().unwrap();
        match ledger.txs.get(&tx_hash) {
            Some(block) => Ok(TxReceipt {
                tx_hash,
                block_number: Some(*block),
                success: true,
            }),
            None => Err(WorkflowError::Rpc(format!("unknown transaction {tx_hash}"))),
        }
    }
}

#[async_trait]
impl ChainState for FakeChain {
    async fn bucket(&self, bucket_id: &BucketId) -> Result<Option<BucketRecord>> {
        let ledger = self.ledger.lock().unwrap();
        Self::ensure_open(&ledger)?;
        Ok(ledger.buckets.get(bucket_id).map(|(_, record)| record.clone()))
    }

    async fn storage_request(&self, file_key: &FileKey) -> Result<Option<StorageRequestRecord>> {
        let mut ledger = self.ledger.lock().unwrap();
        Self::ensure_open(&ledger)?;
        ledger.request_reads += 1;

        let drop_now = match ledger.drop_countdown.get_mut(file_key) {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if drop_now {
            ledger.drop_countdown.remove(file_key);
            ledger.requests.remove(file_key);
        }

        let confirm_now = match ledger.confirm_countdown.get_mut(file_key) {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if confirm_now {
            ledger.confirm_countdown.remove(file_key);
            if let Some(record) = ledger.requests.get_mut(file_key) {
                record.msp = record.msp.map(|(id, _)| (id, true));
            }
        }

        Ok(ledger.requests.get(file_key).cloned())
    }

    async fn close(&self) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.close_calls += 1;
        ledger.closed = true;
        if ledger.fail_close {
            return Err(WorkflowError::Rpc("close failed".into()));
        }
        Ok(())
    }
}

struct BackendState {
    msp_id: B256,
    health: HealthStatus,
    multiaddresses: Vec<String>,
    value_props: Vec<ValueProposition>,
    index_lag: HashMap<BucketId, u32>,
    bucket_queries: u32,
    fail_bucket_status: Option<u16>,
    file_scripts: HashMap<FileKey, VecDeque<Option<FileStatus>>>,
    file_info_queries: u32,
    uploads: HashMap<FileKey, Vec<u8>>,
    upload_count: u32,
    reject_uploads: bool,
    corrupt_uploads: bool,
    logouts: u32,
}

pub struct FakeBackend {
    ledger: Arc<Mutex<Ledger>>,
    state: Mutex<BackendState>,
}

impl FakeBackend {
    fn new(ledger: Arc<Mutex<Ledger>>) -> Self {
        Self {
            ledger,
            state: Mutex::new(BackendState {
                msp_id: B256::repeat_byte(0x4d),
                health: HealthStatus::Healthy,
                multiaddresses: vec![format!("/ip4/127.0.0.1/tcp/30350/p2p/{PEER_A}")],
                value_props: vec![ValueProposition {
                    id: format!("0x{}", "76".repeat(32)),
                    price_per_giga_unit_of_data_per_block: None,
                    data_limit_per_bucket_bytes: None,
                    is_available: true,
                }],
                index_lag: HashMap::new(),
                bucket_queries: 0,
                fail_bucket_status: None,
                file_scripts: HashMap::new(),
                file_info_queries: 0,
                uploads: HashMap::new(),
                upload_count: 0,
                reject_uploads: false,
                corrupt_uploads: false,
                logouts: 0,
            }),
        }
    }

    pub fn msp_id(&self) -> B256 {
        self.state.lock().unwrap().msp_id
    }

    pub fn set_health(&self, health: HealthStatus) {
        self.state.lock().unwrap().health = health;
    }

    pub fn set_multiaddresses(&self, addrs: Vec<String>) {
        self.state.lock().unwrap().multiaddresses = addrs;
    }

    /// Replace the offered value propositions with `(id, is_available)` pairs.
    pub fn set_value_props(&self, offers: Vec<(String, bool)>) {
        self.state.lock().unwrap().value_props = offers
            .into_iter()
            .map(|(id, is_available)| ValueProposition {
                id,
                price_per_giga_unit_of_data_per_block: None,
                data_limit_per_bucket_bytes: None,
                is_available,
            })
            .collect();
    }

    /// The indexer sees `bucket_id` on the `queries`-th lookup.
    pub fn index_bucket_after(&self, bucket_id: BucketId, queries: u32) {
        self.state.lock().unwrap().index_lag.insert(bucket_id, queries);
    }

    pub fn fail_bucket_queries(&self, status: u16) {
        self.state.lock().unwrap().fail_bucket_status = Some(status);
    }

    /// Successive statuses for `file_key`; `None` is a 404. The last entry repeats.
    pub fn script_file_status(&self, file_key: FileKey, statuses: Vec<Option<FileStatus>>) {
        self.state
            .lock()
            .unwrap()
            .file_scripts
            .insert(file_key, statuses.into());
    }

    pub fn reject_uploads(&self) {
        self.state.lock().unwrap().reject_uploads = true;
    }

    /// Flip a bit in every stored copy so downloads differ from the original.
    pub fn corrupt_uploads(&self) {
        self.state.lock().unwrap().corrupt_uploads = true;
    }

    pub fn uploaded(&self, file_key: &FileKey) -> Option<Vec<u8>> {
        self.state.lock().unwrap().uploads.get(file_key).cloned()
    }

    pub fn bucket_queries(&self) -> u32 {
        self.state.lock().unwrap().bucket_queries
    }

    pub fn file_info_queries(&self) -> u32 {
        self.state.lock().unwrap().file_info_queries
    }

    pub fn upload_count(&self) -> u32 {
        self.state.lock().unwrap().upload_count
    }

    pub fn logouts(&self) -> u32 {
        self.state.lock().unwrap().logouts
    }

    fn not_found() -> WorkflowError {
        WorkflowError::Backend {
            status: 404,
            message: "Record not found".into(),
        }
    }
}

#[async_trait]
impl ProviderBackend for FakeBackend {
    async fn health(&self) -> Result<HealthReport> {
        Ok(HealthReport {
            status: self.state.lock().unwrap().health,
            version: Some("test".into()),
        })
    }

    async fn info(&self) -> Result<ProviderInfo> {
        let state = self.state.lock().unwrap();
        Ok(ProviderInfo {
            msp_id: state.msp_id.to_string(),
            multiaddresses: state.multiaddresses.clone(),
            owner_account: None,
            client: Some("fake-msp".into()),
            version: None,
        })
    }

    async fn value_props(&self) -> Result<Vec<ValueProposition>> {
        Ok(self.state.lock().unwrap().value_props.clone())
    }

    async fn auth_nonce(&self, address: Address, chain_id: u64) -> Result<NonceChallenge> {
        Ok(NonceChallenge {
            message: format!("Sign in to the MSP as {address} on chain {chain_id}"),
            nonce: Some("1".into()),
        })
    }

    async fn auth_verify(&self, message: &str, signature: &str) -> Result<Session> {
        let bytes = hex::decode(signature.trim_start_matches("0x"))
            .map_err(|e| WorkflowError::Auth(format!("bad signature hex: {e}")))?;
        let signature = Signature::from_raw(&bytes)
            .map_err(|e| WorkflowError::Auth(format!("bad signature: {e}")))?;
        let address = signature
            .recover_address_from_msg(message.as_bytes())
            .map_err(|e| WorkflowError::Auth(format!("recovery failed: {e}")))?;
        Ok(Session::new(format!("token-{address}"), address))
    }

    async fn logout(&self, _session: Session) -> Result<()> {
        self.state.lock().unwrap().logouts += 1;
        Ok(())
    }

    async fn bucket(&self, bucket_id: &BucketId) -> Result<BackendBucket> {
        let mut state = self.state.lock().unwrap();
        state.bucket_queries += 1;

        if let Some(status) = state.fail_bucket_status {
            return Err(WorkflowError::Backend {
                status,
                message: "indexer unavailable".into(),
            });
        }

        if let Some(remaining) = state.index_lag.get_mut(bucket_id) {
            *remaining = remaining.saturating_sub(1);
            if *remaining > 0 {
                return Err(Self::not_found());
            }
        }

        let ledger = self.ledger.lock().unwrap();
        let (name, _) = ledger.buckets.get(bucket_id).ok_or_else(Self::not_found)?;
        Ok(BackendBucket {
            bucket_id: bucket_id.to_string(),
            name: Some(name.clone()),
            file_count: Some(0),
            size_bytes: Some(0),
        })
    }

    async fn upload_file(
        &self,
        session: &Session,
        metadata: &FileMetadata,
        file_key: &FileKey,
        path: &Path,
    ) -> Result<UploadReceipt> {
        if session.token().is_empty() {
            return Err(WorkflowError::Auth("missing token".into()));
        }
        let mut bytes = tokio::fs::read(path).await?;

        let mut state = self.state.lock().unwrap();
        state.upload_count += 1;
        if state.reject_uploads {
            return Ok(UploadReceipt {
                status: UploadStatus::Other,
                file_key: None,
                bucket_id: None,
                fingerprint: None,
                location: None,
            });
        }
        if state.corrupt_uploads {
            if let Some(last) = bytes.last_mut() {
                *last ^= 0x01;
            }
        }
        state.uploads.insert(*file_key, bytes);

        Ok(UploadReceipt {
            status: UploadStatus::UploadSuccessful,
            file_key: Some(file_key.to_string()),
            bucket_id: Some(metadata.bucket_id.to_string()),
            fingerprint: Some(format!("0x{}", hex::encode(metadata.fingerprint))),
            location: Some(metadata.location.clone()),
        })
    }

    async fn file_info(
        &self,
        _session: &Session,
        bucket_id: &BucketId,
        file_key: &FileKey,
    ) -> Result<FileInfo> {
        let mut state = self.state.lock().unwrap();
        state.file_info_queries += 1;

        let scripted = match state.file_scripts.get_mut(file_key) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().copied(),
            None => None,
        };
        let status = match scripted {
            Some(status) => status,
            None if state.uploads.contains_key(file_key) => Some(FileStatus::Ready),
            None => None,
        };
        let status = status.ok_or_else(Self::not_found)?;

        Ok(FileInfo {
            file_key: file_key.to_string(),
            fingerprint: None,
            bucket_id: Some(bucket_id.to_string()),
            location: None,
            size: state.uploads.get(file_key).map(|b| b.len() as u64),
            is_public: Some(true),
            uploaded_at: None,
            status,
        })
    }

    async fn download_file(
        &self,
        _session: &Session,
        file_key: &FileKey,
        dest: &Path,
    ) -> Result<DownloadedFile> {
        let bytes = self
            .state
            .lock()
            .unwrap()
            .uploads
            .get(file_key)
            .cloned()
            .ok_or_else(Self::not_found)?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(DownloadedFile {
            path: dest.to_path_buf(),
            size: bytes.len() as u64,
            content_type: Some("application/octet-stream".into()),
        })
    }
}

/// One caller's view of the fakes.
pub struct Harness {
    pub identity: Identity,
    pub chain: FakeChain,
    pub backend: FakeBackend,
    pub fingerprinter: Blake3Fingerprinter,
    pub selector: FirstAvailable,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_key(ALITH_KEY)
    }

    pub fn with_key(key: &str) -> Self {
        let identity = Identity::from_private_key(key).unwrap();
        let chain = FakeChain::new(identity.address());
        let backend = FakeBackend::new(chain.ledger.clone());
        Self {
            identity,
            chain,
            backend,
            fingerprinter: Blake3Fingerprinter,
            selector: FirstAvailable,
        }
    }

    /// Point this harness at `other`'s chain and backend index.
    pub fn sharing_chain_with(mut self, other: &Harness) -> Self {
        self.chain.ledger = other.chain.ledger.clone();
        self.backend.ledger = other.chain.ledger.clone();
        self
    }

    pub fn workflow(&self) -> Workflow<'_> {
        Workflow {
            chain: &self.chain,
            state: &self.chain,
            backend: &self.backend,
            identity: &self.identity,
            fingerprinter: &self.fingerprinter,
            selector: &self.selector,
            config: WorkflowConfig::default(),
        }
    }

    /// Write `contents` to a file in a fresh temp dir.
    pub fn sample_file(&self, contents: &[u8]) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }
}
