//! Funding client: throwaway identity → balance → airdrop → confirmation.
//!
//! Every step propagates its error unchanged; nothing is retried.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use tracing::info;

use crate::connection::Connection;
use crate::{ClientError, Result};

/// Lamports as SOL, for display.
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Outcome of [`FundingClient::fund`].
#[derive(Debug, Clone)]
pub struct FundingReport {
    pub address: Pubkey,
    pub balance_before: u64,
    pub signature: Signature,
    pub balance_after: u64,
}

impl FundingReport {
    /// Lamports gained between the two balance reads.
    pub fn funded_lamports(&self) -> u64 {
        self.balance_after.saturating_sub(self.balance_before)
    }
}

impl fmt::Display for FundingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} SOL -> {} SOL (tx {})",
            self.address,
            lamports_to_sol(self.balance_before),
            lamports_to_sol(self.balance_after),
            self.signature
        )
    }
}

pub struct FundingClient {
    connection: Arc<dyn Connection>,
    confirm_timeout: Duration,
}

impl FundingClient {
    pub fn new(connection: Arc<dyn Connection>, confirm_timeout: Duration) -> Self {
        Self {
            connection,
            confirm_timeout,
        }
    }

    /// Fresh random identity; lives as long as the process.
    pub fn generate_identity() -> Keypair {
        Keypair::new()
    }

    pub async fn balance(&self, address: &Pubkey) -> Result<u64> {
        self.connection.get_balance(address).await
    }

    pub async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> Result<Signature> {
        if lamports == 0 {
            return Err(ClientError::InvalidParam("airdrop amount must be > 0".into()));
        }
        self.connection.request_airdrop(address, lamports).await
    }

    pub async fn confirm(&self, signature: &Signature) -> Result<()> {
        self.connection
            .confirm_transaction(signature, self.confirm_timeout)
            .await
    }

    /// Airdrop `lamports` to `identity` and wait for it to land.
    pub async fn fund(&self, identity: &Keypair, lamports: u64) -> Result<FundingReport> {
        let address = identity.pubkey();
        let balance_before = self.balance(&address).await?;
        info!(
            "Funding {} with {} SOL via {} (balance {} SOL)",
            address,
            lamports_to_sol(lamports),
            self.connection.endpoint(),
            lamports_to_sol(balance_before)
        );

        let signature = self.request_airdrop(&address, lamports).await?;
        self.confirm(&signature).await?;
        let balance_after = self.balance(&address).await?;

        let report = FundingReport {
            address,
            balance_before,
            signature,
            balance_after,
        };
        info!("Funded {}", report);
        Ok(report)
    }
}
