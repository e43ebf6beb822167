//! Connection to a validator endpoint.
//!
//! `Connection` is the seam the funding client talks through:
//! - `RpcConnection`: real JSON-RPC via `solana-client`
//! - `SimulatedConnection` (see [`crate::simulator`]): in-process ledger

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tokio::time::sleep;
use tracing::debug;

use crate::config::ClientConfig;
use crate::{ClientError, Result};

/// Interval between signature status polls while confirming.
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Balance of `address` in lamports.
    async fn get_balance(&self, address: &Pubkey) -> Result<u64>;

    /// Ask the faucet for `lamports`. Not retried on rejection.
    async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> Result<Signature>;

    /// Wait until `signature` reaches the connection's commitment level.
    ///
    /// Fails with `TransactionRejected` if the network reports an error, or
    /// `ConfirmationTimeout` once `timeout` has elapsed.
    async fn confirm_transaction(&self, signature: &Signature, timeout: Duration) -> Result<()>;

    fn commitment(&self) -> CommitmentConfig;

    fn endpoint(&self) -> &str;
}

/// JSON-RPC connection backed by the nonblocking `RpcClient`.
#[derive(Clone)]
pub struct RpcConnection {
    rpc: Arc<RpcClient>,
    url: String,
    commitment: CommitmentConfig,
}

impl RpcConnection {
    pub fn new(url: &str, commitment: CommitmentConfig) -> Self {
        let rpc = Arc::new(RpcClient::new_with_commitment(url.to_string(), commitment));
        Self {
            rpc,
            url: url.to_string(),
            commitment,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(&config.rpc_url, config.commitment_config()?))
    }

    /// Shared RPC client, for transports that submit program transactions.
    pub fn rpc(&self) -> Arc<RpcClient> {
        self.rpc.clone()
    }

    // `RpcClient::poll_for_signature_with_commitment` gives up after its own
    // fixed interval; this loop runs until the caller's timeout instead.
    async fn poll_signature(&self, signature: &Signature) -> Result<()> {
        loop {
            let status = self
                .rpc
                .get_signature_status_with_commitment(signature, self.commitment)
                .await
                .map_err(|e| ClientError::Rpc(format!("signature status {}: {}", signature, e)))?;

            match status {
                Some(Ok(())) => {
                    debug!("{} confirmed ({:?})", signature, self.commitment.commitment);
                    return Ok(());
                }
                Some(Err(e)) => {
                    return Err(ClientError::TransactionRejected(format!("{}: {}", signature, e)));
                }
                None => sleep(CONFIRM_POLL_INTERVAL).await,
            }
        }
    }
}

impl fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConnection")
            .field("url", &self.url)
            .field("commitment", &self.commitment.commitment)
            .finish()
    }
}

#[async_trait::async_trait]
impl Connection for RpcConnection {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        self.rpc
            .get_balance_with_commitment(address, self.commitment)
            .await
            .map(|response| response.value)
            .map_err(|e| ClientError::Rpc(format!("get balance of {}: {}", address, e)))
    }

    async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> Result<Signature> {
        let signature = self
            .rpc
            .request_airdrop(address, lamports)
            .await
            .map_err(|e| ClientError::Airdrop(e.to_string()))?;
        debug!("Airdrop of {} lamports to {} submitted: {}", lamports, address, signature);
        Ok(signature)
    }

    async fn confirm_transaction(&self, signature: &Signature, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.poll_signature(signature))
            .await
            .map_err(|_| ClientError::ConfirmationTimeout {
                signature: signature.to_string(),
                timeout,
            })?
    }

    fn commitment(&self) -> CommitmentConfig {
        self.commitment
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
