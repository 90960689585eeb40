/// Authenticated session with the MSP backend.
///
/// Sign-in is a challenge/response exchange:
/// 1. Client asks for a nonce message bound to its address and chain id
/// 2. Client signs the message with its account key (EIP-191)
/// 3. Backend verifies the signature and issues a bearer token
///
/// The session lives in process memory only and is passed explicitly to
/// every authenticated call. Logging out consumes it.
use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use tracing::info;

use super::ProviderBackend;
use crate::error::{Result, WorkflowError};
use crate::identity::Identity;

pub struct Session {
    token: String,
    address: Address,
    established_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(token: impl Into<String>, address: Address) -> Self {
        Self {
            token: token.into(),
            address,
            established_at: Utc::now(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }
}

/// Run the challenge/response sign-in for `identity`.
pub async fn sign_in(
    backend: &dyn ProviderBackend,
    identity: &Identity,
    chain_id: u64,
) -> Result<Session> {
    let address = identity.address();
    let challenge = backend.auth_nonce(address, chain_id).await?;
    let signature = identity.sign_message(challenge.message.as_bytes()).await?;
    let session = backend.auth_verify(&challenge.message, &signature).await?;

    if session.address() != address {
        return Err(WorkflowError::Auth(format!(
            "session issued for {} instead of {address}",
            session.address()
        )));
    }

    info!(
        address = %address,
        established_at = %session.established_at(),
        "Signed in to MSP backend"
    );
    Ok(session)
}
