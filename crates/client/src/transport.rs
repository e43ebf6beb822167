//! Solana RPC transport for counter program calls.
//!
//! Builds Anchor instructions (`global:<method>` discriminator + borsh args),
//! signs with the payer and submits through `solana-client`. Events from the
//! submitted transactions arrive through the log subscriber, or, with log
//! polling enabled, from the confirmed transaction's `getTransaction` logs.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use helloworld_core::instruction_discriminator;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::system_program;
use solana_sdk::transaction::Transaction;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::loader::{LogSource, RpcLogSource};
use crate::program::{LogSink, Method, ProgramTransport, TransactionResult};
use crate::{ClientError, Result};

/// Attempts at reading a just-confirmed transaction back; the node may not
/// serve it at the history commitment yet.
const LOG_FETCH_ATTEMPTS: usize = 5;
const LOG_FETCH_DELAY: Duration = Duration::from_millis(400);

pub struct RpcTransport {
    rpc: Arc<RpcClient>,
    program_id: Pubkey,
    payer: Keypair,
    /// Counter account created by the last successful `create`.
    counter: Mutex<Option<Pubkey>>,
    /// Set when events are read back with `getTransaction` instead of
    /// arriving over the websocket.
    log_source: Option<RpcLogSource>,
}

impl RpcTransport {
    /// `payer` signs every call, pays rent and is the counter authority.
    pub fn new(rpc: Arc<RpcClient>, program_id: Pubkey, payer: Keypair) -> Self {
        Self {
            rpc,
            program_id,
            payer,
            counter: Mutex::new(None),
            log_source: None,
        }
    }

    /// Deliver each confirmed call's own logs to the sink before `invoke`
    /// returns.
    pub fn with_log_polling(mut self, commitment: CommitmentConfig) -> Self {
        self.log_source = Some(RpcLogSource::new(self.rpc.clone(), commitment));
        self
    }

    pub fn polls_logs(&self) -> bool {
        self.log_source.is_some()
    }

    pub fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    /// Counter targeted by `increment`, if one was created.
    pub fn counter(&self) -> Option<Pubkey> {
        *self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `create(authority)` with accounts `[counter (signer, init), user (signer), system_program]`.
    fn create_instruction(&self, counter: &Pubkey) -> Instruction {
        let mut data = instruction_discriminator(Method::Create.name()).to_vec();
        data.extend_from_slice(&self.payer.pubkey().to_bytes());
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(*counter, true),
                AccountMeta::new(self.payer.pubkey(), true),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data,
        }
    }

    /// `increment()` with accounts `[counter (mut), authority (signer)]`.
    fn increment_instruction(&self, counter: &Pubkey) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(*counter, false),
                AccountMeta::new_readonly(self.payer.pubkey(), true),
            ],
            data: instruction_discriminator(Method::Increment.name()).to_vec(),
        }
    }

    async fn send(&self, ix: Instruction, extra_signer: Option<&Keypair>) -> Result<Signature> {
        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| ClientError::Rpc(format!("get blockhash: {}", e)))?;

        let mut signers: Vec<&Keypair> = vec![&self.payer];
        signers.extend(extra_signer);
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&self.payer.pubkey()),
            &signers,
            blockhash,
        );

        self.rpc
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(|e| ClientError::TransactionRejected(e.to_string()))
    }

    /// Read `signature`'s logs back and hand them to `sink`. The call has
    /// already landed, so a failed read is only logged.
    async fn deliver_logs(&self, source: &RpcLogSource, signature: &Signature, sink: &LogSink) {
        let signature = signature.to_string();
        for attempt in 1..=LOG_FETCH_ATTEMPTS {
            match source.transaction_logs(&signature).await {
                Ok(Some(logs)) => {
                    let fired = sink.deliver(&logs);
                    debug!("tx {}: {} listener callback(s)", signature, fired);
                    return;
                }
                Ok(None) => {
                    warn!("tx {} has no logs to deliver", signature);
                    return;
                }
                Err(e) if attempt < LOG_FETCH_ATTEMPTS => {
                    debug!("Logs for {} not readable yet ({}), retrying", signature, e);
                    sleep(LOG_FETCH_DELAY).await;
                }
                Err(e) => warn!("Giving up on logs for {}: {}", signature, e),
            }
        }
    }
}

impl fmt::Debug for RpcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcTransport")
            .field("program_id", &self.program_id)
            .field("payer", &self.payer.pubkey())
            .field("counter", &self.counter())
            .field("polls_logs", &self.polls_logs())
            .finish()
    }
}

#[async_trait::async_trait]
impl ProgramTransport for RpcTransport {
    async fn invoke(&self, method: Method, sink: &LogSink) -> Result<TransactionResult> {
        let signature = match method {
            Method::Create => {
                let counter = Keypair::new();
                debug!("Creating counter {}", counter.pubkey());
                let ix = self.create_instruction(&counter.pubkey());
                let signature = self.send(ix, Some(&counter)).await?;
                *self.counter.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(counter.pubkey());
                signature
            }
            Method::Increment => {
                let counter = self.counter().ok_or_else(|| {
                    ClientError::InvalidParam("increment needs a counter; call create first".into())
                })?;
                let ix = self.increment_instruction(&counter);
                self.send(ix, None).await?
            }
        };

        info!("{} confirmed: {}", method, signature);
        if let Some(source) = &self.log_source {
            self.deliver_logs(source, &signature, sink).await;
        }
        Ok(TransactionResult {
            signature: signature.to_string(),
            confirmed: true,
        })
    }

    fn is_simulated(&self) -> bool {
        false
    }
}
