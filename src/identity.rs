/// Caller identity: one secp256k1 account used both for chain
/// transactions and for signing in to the MSP backend.
///
/// Created once at startup from a hex private key and kept for the whole run.
use alloy::primitives::{Address, Signature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;

use crate::error::{Result, WorkflowError};

#[derive(Clone)]
pub struct Identity {
    signer: PrivateKeySigner,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Parse a hex private key, with or without the `0x` prefix.
    pub fn from_private_key(key_hex: &str) -> Result<Self> {
        let trimmed = key_hex.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(WorkflowError::Config("private key is empty".into()));
        }

        let signer: PrivateKeySigner = trimmed
            .parse()
            .map_err(|e| WorkflowError::Config(format!("Invalid private key: {e}")))?;

        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// EIP-191 personal-message signature, 0x-hex encoded (65 bytes).
    pub async fn sign_message(&self, message: &[u8]) -> Result<String> {
        let sig = self
            .signer
            .sign_message(message)
            .await
            .map_err(|e| WorkflowError::Signing(format!("message signing failed: {e}")))?;
        Ok(format!("0x{}", hex::encode(sig.as_bytes())))
    }

    pub async fn sign_hash(&self, hash: &B256) -> Result<Signature> {
        self.signer
            .sign_hash(hash)
            .await
            .map_err(|e| WorkflowError::Signing(format!("transaction signing failed: {e}")))
    }
}
