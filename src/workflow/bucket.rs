/// Bucket lifecycle: create on chain, read it back, wait for the backend to index it.
use alloy::primitives::B256;
use tracing::{info, warn};

use super::Workflow;
use crate::backend::BackendBucket;
use crate::chain::{BucketRecord, TxReceipt};
use crate::crypto::{derive_bucket_id, BucketId};
use crate::error::{Result, WorkflowError};
use crate::poll::{poll_until, PollStatus};

/// A bucket whose creation transaction has been included.
#[derive(Debug, Clone)]
pub struct CreatedBucket {
    pub bucket_id: BucketId,
    pub name: String,
    pub msp_id: B256,
    pub value_prop_id: B256,
    pub receipt: TxReceipt,
}

impl Workflow<'_> {
    /// Create bucket `name` under the caller's account with the backend's MSP.
    ///
    /// Fails if the provider offers no usable value proposition, or if the
    /// transaction is rejected (including when the name is already taken).
    pub async fn create_bucket(&self, name: &str) -> Result<CreatedBucket> {
        let info = self.backend.info().await?;
        let msp_id = info.provider_id()?;

        let offers = self.backend.value_props().await?;
        let offer = self.selector.select(&offers).ok_or_else(|| {
            WorkflowError::ProviderCapability(format!(
                "MSP {msp_id} offers no value propositions ({} listed)",
                offers.len()
            ))
        })?;
        let value_prop_id = offer.value_prop_id()?;

        let bucket_id = derive_bucket_id(&self.chain.owner(), name);
        info!(
            bucket = name,
            bucket_id = %bucket_id,
            msp_id = %msp_id,
            value_prop_id = %value_prop_id,
            "Creating bucket"
        );

        let tx_hash = self
            .chain
            .create_bucket(msp_id, name, self.config.private_bucket, value_prop_id)
            .await?;
        let receipt = self.chain.wait_for_receipt(tx_hash).await?;

        info!(
            bucket_id = %bucket_id,
            tx_hash = %receipt.tx_hash,
            block = ?receipt.block_number,
            "Bucket created"
        );

        Ok(CreatedBucket {
            bucket_id,
            name: name.to_string(),
            msp_id,
            value_prop_id,
            receipt,
        })
    }

    /// Read the bucket back from chain state.
    pub async fn verify_bucket_creation(&self, bucket_id: &BucketId) -> Result<BucketRecord> {
        let record = self
            .state
            .bucket(bucket_id)
            .await?
            .ok_or_else(|| WorkflowError::BucketNotFound(bucket_id.to_string()))?;

        let owner = self.chain.owner();
        if record.owner != owner {
            return Err(WorkflowError::ChainConsistency(format!(
                "bucket {bucket_id} owned by {} instead of {owner}",
                record.owner
            )));
        }

        if record.msp_id.is_none() {
            warn!(bucket_id = %bucket_id, "Bucket has no MSP assigned on chain");
        }

        info!(bucket_id = %bucket_id, owner = %record.owner, "Bucket found on chain");
        Ok(record)
    }

    /// Poll the backend until its indexer knows about the bucket.
    pub async fn wait_for_backend_bucket_ready(
        &self,
        bucket_id: &BucketId,
    ) -> Result<BackendBucket> {
        let backend = self.backend;
        let bucket_id = *bucket_id;
        let what = format!("backend to index bucket {bucket_id}");

        let bucket = poll_until(&self.config.bucket_ready, &what, move |_| async move {
            match backend.bucket(&bucket_id).await {
                Ok(bucket) => Ok(PollStatus::Ready(bucket)),
                Err(e) if e.is_not_found() => Ok(PollStatus::Pending),
                Err(e) => Err(e),
            }
        })
        .await?;

        info!(bucket_id = %bucket_id, "Bucket indexed by backend");
        Ok(bucket)
    }
}
