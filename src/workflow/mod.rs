/// Bucket and file lifecycles.
///
/// [`Workflow`] binds the collaborators (chain, chain state, MSP backend)
/// to the caller's identity and exposes each lifecycle step as one method.
/// Steps are independent so the orchestrator, the CLI and tests can drive
/// them one at a time.
pub mod bucket;
pub mod file;

use crate::backend::{ProviderBackend, ValueProposition};
use crate::chain::{ChainState, StorageChain};
use crate::crypto::Fingerprinter;
use crate::identity::Identity;
use crate::poll::PollPolicy;

pub use bucket::CreatedBucket;
pub use file::{peer_ids_from_multiaddrs, verify_download, UploadedFile};

/// Picks the value proposition a bucket is created under.
pub trait ValuePropSelector: Send + Sync {
    fn select<'a>(&self, offers: &'a [ValueProposition]) -> Option<&'a ValueProposition>;
}

/// First offer the provider marks as available.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstAvailable;

impl ValuePropSelector for FirstAvailable {
    fn select<'a>(&self, offers: &'a [ValueProposition]) -> Option<&'a ValueProposition> {
        offers.iter().find(|offer| offer.is_available)
    }
}

/// Tunables for a workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub bucket_ready: PollPolicy,
    pub msp_confirmation: PollPolicy,
    pub file_ready: PollPolicy,
    /// Replicas requested with the custom replication target.
    pub replicas: u32,
    pub private_bucket: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            bucket_ready: PollPolicy::backend_bucket_ready(),
            msp_confirmation: PollPolicy::msp_confirmation(),
            file_ready: PollPolicy::backend_file_ready(),
            replicas: 1,
            private_bucket: false,
        }
    }
}

/// Collaborators and policies for one run.
pub struct Workflow<'a> {
    pub chain: &'a dyn StorageChain,
    pub state: &'a dyn ChainState,
    pub backend: &'a dyn ProviderBackend,
    pub identity: &'a Identity,
    pub fingerprinter: &'a dyn Fingerprinter,
    pub selector: &'a dyn ValuePropSelector,
    pub config: WorkflowConfig,
}
