/// Process configuration.
///
/// Everything comes from CLI flags with environment fallbacks (a `.env`
/// file is loaded by the binary first). Nothing is contacted until
/// [`Settings::validate`] has parsed the key and every endpoint.
use std::time::Duration;

use alloy::primitives::Address;
use clap::Args;
use reqwest::Url;

use crate::chain::evm::FILE_SYSTEM_PRECOMPILE;
use crate::error::{Result, WorkflowError};
use crate::identity::Identity;

#[derive(Clone, Args)]
pub struct Settings {
    /// Hex private key of the account that owns buckets and files.
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Ethereum JSON-RPC endpoint used for transactions.
    #[arg(long, env = "CHAIN_RPC_URL")]
    pub chain_rpc_url: Option<String>,

    /// Substrate JSON-RPC endpoint used for state queries (ws:// is mapped to http://).
    #[arg(long, env = "CHAIN_STATE_URL")]
    pub chain_state_url: Option<String>,

    /// MSP backend base URL.
    #[arg(long, env = "MSP_BACKEND_URL")]
    pub msp_backend_url: Option<String>,

    /// File-system precompile address.
    #[arg(long, env = "FILE_SYSTEM_ADDRESS")]
    pub file_system_address: Option<String>,

    /// Expected chain id. Queried from the node when unset.
    #[arg(long, env = "CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Timeout for a single MSP backend request, in seconds.
    #[arg(long, env = "MSP_TIMEOUT_SECS", default_value_t = 300)]
    pub msp_timeout_secs: u64,

    /// Replicas requested for each stored file.
    #[arg(long, env = "REPLICAS", default_value_t = 1)]
    pub replicas: u32,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub identity: Identity,
    pub chain_rpc_url: Url,
    pub chain_state_url: Url,
    pub msp_backend_url: Url,
    pub file_system_address: Address,
    pub chain_id: Option<u64>,
    pub msp_timeout: Duration,
    pub replicas: u32,
}

impl Settings {
    /// Parse and check everything needed for a full run.
    pub fn validate(&self) -> Result<Config> {
        let identity = self.identity()?;
        let chain_rpc_url = http_endpoint(required(&self.chain_rpc_url, "CHAIN_RPC_URL")?)?;
        let chain_state_url = http_endpoint(required(&self.chain_state_url, "CHAIN_STATE_URL")?)?;
        let msp_backend_url = self.msp_backend_url()?;

        let file_system_address = match self.file_system_address.as_deref() {
            Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
                WorkflowError::Config(format!("Invalid FILE_SYSTEM_ADDRESS '{raw}': {e}"))
            })?,
            _ => FILE_SYSTEM_PRECOMPILE,
        };

        if self.replicas == 0 {
            return Err(WorkflowError::Config("REPLICAS must be at least 1".into()));
        }
        if self.msp_timeout_secs == 0 {
            return Err(WorkflowError::Config("MSP_TIMEOUT_SECS must be positive".into()));
        }

        Ok(Config {
            identity,
            chain_rpc_url,
            chain_state_url,
            msp_backend_url,
            file_system_address,
            chain_id: self.chain_id,
            msp_timeout: Duration::from_secs(self.msp_timeout_secs),
            replicas: self.replicas,
        })
    }

    pub fn identity(&self) -> Result<Identity> {
        Identity::from_private_key(required(&self.private_key, "PRIVATE_KEY")?)
    }

    pub fn msp_backend_url(&self) -> Result<Url> {
        let url = parse_url(required(&self.msp_backend_url, "MSP_BACKEND_URL")?)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(WorkflowError::Config(format!(
                "MSP_BACKEND_URL must be http(s), got {other}://"
            ))),
        }
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(WorkflowError::Config(format!("{name} is not set"))),
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| WorkflowError::Config(format!("Invalid URL '{raw}': {e}")))
}

/// Parse a JSON-RPC endpoint, mapping websocket schemes to their HTTP equivalents.
pub fn http_endpoint(raw: &str) -> Result<Url> {
    let mut url = parse_url(raw)?;
    let scheme = match url.scheme() {
        "http" | "https" => return Ok(url),
        "ws" => "http",
        "wss" => "https",
        other => {
            return Err(WorkflowError::Config(format!(
                "Unsupported scheme {other}:// in '{raw}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| WorkflowError::Config(format!("Cannot map '{raw}' to {scheme}://")))?;
    Ok(url)
}
