/// Transaction submission through the StorageHub file-system precompile.
///
/// The runtime exposes bucket and storage-request extrinsics as an EVM
/// precompile. Calls are ABI-encoded, wrapped in a legacy transaction,
/// signed locally and sent with raw JSON-RPC:
/// - nonce: `eth_getTransactionCount(pending)`
/// - gas price: `eth_gasPrice`
/// - gas limit: `eth_estimateGas` plus a 20% margin
use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{address, Address, Bytes, TxKind, B256, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::rpc::{parse_quantity, parse_u64_quantity, JsonRpcClient};
use super::{StorageChain, StorageRequestParams, TxHash, TxReceipt};
use crate::error::{Result, WorkflowError};
use crate::identity::Identity;
use crate::poll::{poll_until, PollPolicy, PollStatus};

/// Address of the file-system precompile on StorageHub EVM runtimes.
pub const FILE_SYSTEM_PRECOMPILE: Address = address!("0000000000000000000000000000000000000404");

sol! {
    interface FileSystem {
        function createBucket(bytes32 mspId, bytes name, bool isPrivate, bytes32 valuePropId) external;
        function issueStorageRequest(
            bytes32 bucketId,
            bytes location,
            bytes32 fingerprint,
            uint64 size,
            bytes32 mspId,
            bytes[] peerIds,
            uint8 replicationTarget,
            uint32 customReplicationTarget
        ) external;
    }
}

/// Configuration for the EVM transaction client.
#[derive(Debug, Clone)]
pub struct EvmConfig {
    /// Ethereum JSON-RPC endpoint of the chain.
    pub rpc_url: String,
    /// File-system precompile the calls are sent to.
    pub file_system_address: Address,
    /// Chain id; queried with `eth_chainId` when absent.
    pub chain_id: Option<u64>,
    pub receipt_policy: PollPolicy,
}

impl EvmConfig {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            file_system_address: FILE_SYSTEM_PRECOMPILE,
            chain_id: None,
            receipt_policy: PollPolicy::transaction_receipt(),
        }
    }
}

pub struct EvmStorageChain {
    rpc: JsonRpcClient,
    identity: Identity,
    file_system: Address,
    chain_id: u64,
    receipt_policy: PollPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    status: Option<String>,
    block_number: Option<String>,
}

impl EvmStorageChain {
    pub async fn connect(config: EvmConfig, identity: Identity) -> Result<Self> {
        let rpc = JsonRpcClient::new(&config.rpc_url)?;

        let chain_id = match config.chain_id {
            Some(id) => id,
            None => {
                let hex: String = rpc.call("eth_chainId", serde_json::json!([])).await?;
                parse_u64_quantity(&hex)?
            }
        };

        info!(
            rpc_url = %config.rpc_url,
            chain_id,
            account = %identity.address(),
            "Connected to chain RPC"
        );

        Ok(Self {
            rpc,
            identity,
            file_system: config.file_system_address,
            chain_id,
            receipt_policy: config.receipt_policy,
        })
    }

    /// Sign and broadcast a call to the precompile. Returns the transaction hash.
    async fn send_call(&self, input: Vec<u8>) -> Result<TxHash> {
        let from = self.identity.address();
        let input = Bytes::from(input);

        let nonce_hex: String = self
            .rpc
            .call(
                "eth_getTransactionCount",
                serde_json::json!([format!("{from:?}"), "pending"]),
            )
            .await?;
        let nonce = parse_u64_quantity(&nonce_hex)?;

        let gas_price_hex: String = self.rpc.call("eth_gasPrice", serde_json::json!([])).await?;
        let gas_price = parse_quantity(&gas_price_hex)?;

        let gas_hex: String = self
            .rpc
            .call(
                "eth_estimateGas",
                serde_json::json!([{
                    "from": format!("{from:?}"),
                    "to": format!("{:?}", self.file_system),
                    "data": format!("0x{}", hex::encode(&input)),
                }]),
            )
            .await
            .map_err(submission_rejected)?;
        let gas_limit = parse_u64_quantity(&gas_hex)?.saturating_mul(12) / 10;

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Call(self.file_system),
            value: U256::ZERO,
            input,
        };

        let sig = self.identity.sign_hash(&tx.signature_hash()).await?;
        let signed = TxEnvelope::Legacy(tx.into_signed(sig));

        let mut raw_tx = Vec::new();
        signed.encode_2718(&mut raw_tx);
        let raw_hex = format!("0x{}", hex::encode(&raw_tx));

        let tx_hash: String = self
            .rpc
            .call("eth_sendRawTransaction", serde_json::json!([raw_hex]))
            .await
            .map_err(submission_rejected)?;

        debug!(tx_hash = %tx_hash, nonce, gas_limit, "Transaction submitted");

        tx_hash
            .parse()
            .map_err(|e| WorkflowError::Serialization(format!("Invalid tx hash '{tx_hash}': {e}")))
    }
}

/// Placeholder hash for transactions the node refused before broadcast.
pub const UNSENT_TX: &str = "<unsent>";

/// A node refusing a call during estimation or broadcast (a revert such as
/// a duplicate bucket name) is a failed transaction, not a transport error.
fn submission_rejected(err: WorkflowError) -> WorkflowError {
    match err {
        WorkflowError::RpcRejected {
            method, message, ..
        } => WorkflowError::TransactionFailed {
            tx_hash: UNSENT_TX.to_string(),
            reason: format!("{method}: {message}"),
        },
        other => other,
    }
}

#[async_trait]
impl StorageChain for EvmStorageChain {
    fn owner(&self) -> Address {
        self.identity.address()
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn create_bucket(
        &self,
        msp_id: B256,
        name: &str,
        private: bool,
        value_prop_id: B256,
    ) -> Result<TxHash> {
        let call = FileSystem::createBucketCall {
            mspId: msp_id,
            name: Bytes::copy_from_slice(name.as_bytes()),
            isPrivate: private,
            valuePropId: value_prop_id,
        };
        self.send_call(call.abi_encode()).await
    }

    async fn issue_storage_request(&self, request: &StorageRequestParams) -> Result<TxHash> {
        let call = FileSystem::issueStorageRequestCall {
            bucketId: request.bucket_id,
            location: Bytes::copy_from_slice(request.location.as_bytes()),
            fingerprint: B256::from(request.fingerprint),
            size: request.size,
            mspId: request.msp_id,
            peerIds: request
                .peer_ids
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                .collect(),
            replicationTarget: request.replication as u8,
            customReplicationTarget: request.replicas,
        };
        self.send_call(call.abi_encode()).await
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt> {
        let rpc = &self.rpc;
        let what = format!("receipt of transaction {tx_hash}");

        let receipt = poll_until(&self.receipt_policy, &what, move |_| async move {
            let receipt: Option<RpcReceipt> = rpc
                .call(
                    "eth_getTransactionReceipt",
                    serde_json::json!([tx_hash.to_string()]),
                )
                .await?;
            Ok::<_, WorkflowError>(match receipt {
                Some(r) => PollStatus::Ready(r),
                None => PollStatus::Pending,
            })
        })
        .await?;

        let block_number = match receipt.block_number.as_deref() {
            Some(n) => Some(parse_u64_quantity(n)?),
            None => None,
        };
        let success = receipt.status.as_deref() == Some("0x1");

        if !success {
            return Err(WorkflowError::TransactionFailed {
                tx_hash: tx_hash.to_string(),
                reason: format!(
                    "receipt status {}",
                    receipt.status.as_deref().unwrap_or("missing")
                ),
            });
        }

        Ok(TxReceipt {
            tx_hash,
            block_number,
            success,
        })
    }
}
