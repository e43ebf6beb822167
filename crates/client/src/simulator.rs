//! In-process stand-ins for a local validator.
//!
//! - `SimulatedConnection`: ledger with a faucet; airdrops finalize on confirm
//! - `SimulatedTransport`: the counter program, writing its transaction logs
//!   into the program's `LogSink` before the call returns
//!
//! Used by `--dry-run` and by tests that need a program handle without a
//! running validator.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use helloworld_core::{CountChangeEvent, ProgramEvent};
use sha2::{Digest, Sha256};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::loader::{page_newest_first, LogSource, SignatureEntry};
use crate::program::{LogSink, Method, ProgramTransport, TransactionResult};
use crate::{ClientError, Result};

const SIMULATED_ENDPOINT: &str = "simulated://localnet";

/// Faucet balance of a fresh simulated ledger: 500M SOL, like a test validator.
const DEFAULT_FAUCET_LAMPORTS: u64 = 500_000_000 * LAMPORTS_PER_SOL;

/// Compute units reported per simulated instruction.
const COMPUTE_UNITS: u64 = 5_000;
const COMPUTE_UNIT_LIMIT: u64 = 200_000;

// ── Ledger ──────────────────────────────────────────────────────────────

struct Ledger {
    balances: HashMap<Pubkey, u64>,
    /// Airdrops submitted but not yet confirmed.
    pending: HashMap<Signature, (Pubkey, u64)>,
    confirmed: HashSet<Signature>,
    faucet_lamports: u64,
    nonce: u64,
}

pub struct SimulatedConnection {
    faucet: Keypair,
    commitment: CommitmentConfig,
    ledger: Mutex<Ledger>,
}

impl SimulatedConnection {
    pub fn new() -> Self {
        Self::with_faucet(DEFAULT_FAUCET_LAMPORTS)
    }

    /// Ledger whose faucet holds `faucet_lamports`.
    pub fn with_faucet(faucet_lamports: u64) -> Self {
        Self {
            faucet: Keypair::new(),
            commitment: CommitmentConfig::confirmed(),
            ledger: Mutex::new(Ledger {
                balances: HashMap::new(),
                pending: HashMap::new(),
                confirmed: HashSet::new(),
                faucet_lamports,
                nonce: 0,
            }),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Airdrops submitted but not yet confirmed.
    pub fn pending_airdrops(&self) -> usize {
        self.ledger().pending.len()
    }
}

impl Default for SimulatedConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Connection for SimulatedConnection {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        Ok(self.ledger().balances.get(address).copied().unwrap_or(0))
    }

    async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> Result<Signature> {
        let mut ledger = self.ledger();
        if lamports > ledger.faucet_lamports {
            return Err(ClientError::Airdrop(format!(
                "faucet has insufficient funds: requested {} lamports, {} available",
                lamports, ledger.faucet_lamports
            )));
        }
        ledger.faucet_lamports -= lamports;
        ledger.nonce += 1;

        let mut message = address.to_bytes().to_vec();
        message.extend_from_slice(&lamports.to_le_bytes());
        message.extend_from_slice(&ledger.nonce.to_le_bytes());
        let signature = self.faucet.sign_message(&message);

        ledger.pending.insert(signature, (*address, lamports));
        debug!("Simulated airdrop of {} lamports to {}: {}", lamports, address, signature);
        Ok(signature)
    }

    async fn confirm_transaction(&self, signature: &Signature, timeout: Duration) -> Result<()> {
        let mut ledger = self.ledger();
        if ledger.confirmed.contains(signature) {
            return Ok(());
        }
        match ledger.pending.remove(signature) {
            Some((address, lamports)) => {
                *ledger.balances.entry(address).or_insert(0) += lamports;
                ledger.confirmed.insert(*signature);
                Ok(())
            }
            // never submitted here, so it can never land
            None => Err(ClientError::ConfirmationTimeout {
                signature: signature.to_string(),
                timeout,
            }),
        }
    }

    fn commitment(&self) -> CommitmentConfig {
        self.commitment
    }

    fn endpoint(&self) -> &str {
        SIMULATED_ENDPOINT
    }
}

// ── Counter program ─────────────────────────────────────────────────────

/// Anchor error 3012, raised when `increment` runs before `create`.
const ACCOUNT_NOT_INITIALIZED_LOG: &str = "Program log: AnchorError caused by account: counter. \
Error Code: AccountNotInitialized. Error Number: 3012. \
Error Message: The program expected this account to be already initialized.";

struct SimulatedTx {
    entry: SignatureEntry,
    logs: Vec<String>,
}

struct CounterState {
    /// `None` until `create` runs.
    count: Option<u64>,
    tx_seq: u64,
    /// Every submitted call, oldest first, failed ones included.
    history: Vec<SimulatedTx>,
}

pub struct SimulatedTransport {
    program_id: Pubkey,
    deliver_events: bool,
    state: Mutex<CounterState>,
}

impl SimulatedTransport {
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            program_id,
            deliver_events: true,
            state: Mutex::new(CounterState {
                count: None,
                tx_seq: 0,
                history: Vec::new(),
            }),
        }
    }

    /// Program that executes calls but whose logs never reach listeners,
    /// like a validator without a working log subscription. The history is
    /// still readable through [`LogSource`].
    pub fn without_event_delivery(program_id: Pubkey) -> Self {
        Self {
            deliver_events: false,
            ..Self::new(program_id)
        }
    }

    fn state(&self) -> MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current counter value, `None` before `create`.
    pub fn count(&self) -> Option<u64> {
        self.state().count
    }

    /// Submitted calls so far, failed ones included.
    pub fn transaction_count(&self) -> usize {
        self.state().history.len()
    }

    /// Run `method` against the counter and return the event it emits.
    ///
    /// `increment` reports the value the counter held when the call started,
    /// so a fresh counter reports 0. The deployed program reports the value
    /// after the increment (1 on a fresh counter).
    fn execute(&self, method: Method) -> Result<ProgramEvent> {
        let mut state = self.state();
        let event = match method {
            Method::Create => {
                state.count = Some(0);
                CountChangeEvent {
                    data: 0,
                    label: "create".into(),
                }
            }
            Method::Increment => {
                let current = state.count.ok_or_else(|| {
                    ClientError::TransactionRejected(
                        "AccountNotInitialized: counter has not been created".into(),
                    )
                })?;
                state.count = Some(current + 1);
                CountChangeEvent {
                    data: current,
                    label: "inc".into(),
                }
            }
        };
        Ok(event.into())
    }

    fn call_logs(&self, method: Method, event: Option<&ProgramEvent>) -> Result<Vec<String>> {
        let pid = self.program_id;
        let mut logs = vec![
            format!("Program {} invoke [1]", pid),
            format!("Program log: Instruction: {}", method.instruction_name()),
        ];
        match event {
            Some(event) => logs.push(event.to_log_line()?),
            None => logs.push(ACCOUNT_NOT_INITIALIZED_LOG.to_string()),
        }
        logs.push(format!(
            "Program {} consumed {} of {} compute units",
            pid, COMPUTE_UNITS, COMPUTE_UNIT_LIMIT
        ));
        logs.push(match event {
            Some(_) => format!("Program {} success", pid),
            None => format!("Program {} failed: custom program error: 0xbc4", pid),
        });
        Ok(logs)
    }

    /// Append a call to the history and return its signature.
    fn record(&self, method: Method, logs: Vec<String>, failed: bool) -> String {
        let mut state = self.state();
        state.tx_seq += 1;
        let seq = state.tx_seq;

        let mut hasher = Sha256::new();
        hasher.update(self.program_id.as_ref());
        hasher.update(seq.to_le_bytes());
        hasher.update(method.name().as_bytes());
        let signature = format!("sim:{}", hex::encode(&hasher.finalize()[..16]));

        state.history.push(SimulatedTx {
            entry: SignatureEntry {
                signature: signature.clone(),
                slot: seq,
                failed,
            },
            logs,
        });
        signature
    }
}

#[async_trait::async_trait]
impl ProgramTransport for SimulatedTransport {
    async fn invoke(&self, method: Method, sink: &LogSink) -> Result<TransactionResult> {
        let event = match self.execute(method) {
            Ok(event) => event,
            Err(e) => {
                let logs = self.call_logs(method, None)?;
                let signature = self.record(method, logs, true);
                debug!("Simulated {} failed: {}", method, signature);
                return Err(e);
            }
        };
        let logs = self.call_logs(method, Some(&event))?;
        let signature = self.record(method, logs.clone(), false);

        info!("Simulated {} ({} log lines): {}", method, logs.len(), signature);
        if self.deliver_events {
            sink.deliver(&logs);
        }

        Ok(TransactionResult {
            signature,
            confirmed: true,
        })
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

#[async_trait::async_trait]
impl LogSource for SimulatedTransport {
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<&str>,
        until: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureEntry>> {
        if *address != self.program_id {
            return Ok(Vec::new());
        }
        let state = self.state();
        Ok(page_newest_first(
            state.history.iter().map(|tx| &tx.entry),
            before,
            until,
            limit,
        ))
    }

    async fn transaction_logs(&self, signature: &str) -> Result<Option<Vec<String>>> {
        let state = self.state();
        let tx = state
            .history
            .iter()
            .find(|tx| tx.entry.signature == signature)
            .ok_or_else(|| ClientError::Rpc(format!("transaction {} not found", signature)))?;
        Ok((!tx.entry.failed).then(|| tx.logs.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ListenerRegistry;
    use helloworld_core::{extract_events, PROGRAM_ID};
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_airdrop_credits_on_confirm() {
        let conn = SimulatedConnection::new();
        let who = Pubkey::new_unique();

        let sig = conn.request_airdrop(&who, 2 * LAMPORTS_PER_SOL).await.unwrap();
        assert_eq!(conn.get_balance(&who).await.unwrap(), 0);
        assert_eq!(conn.pending_airdrops(), 1);

        conn.confirm_transaction(&sig, TIMEOUT).await.unwrap();
        assert_eq!(conn.get_balance(&who).await.unwrap(), 2 * LAMPORTS_PER_SOL);
        assert_eq!(conn.pending_airdrops(), 0);

        // confirming again does not credit twice
        conn.confirm_transaction(&sig, TIMEOUT).await.unwrap();
        assert_eq!(conn.get_balance(&who).await.unwrap(), 2 * LAMPORTS_PER_SOL);
    }

    #[tokio::test]
    async fn test_faucet_exhausted() {
        let conn = SimulatedConnection::with_faucet(LAMPORTS_PER_SOL);
        let who = Pubkey::new_unique();
        let err = conn
            .request_airdrop(&who, 2 * LAMPORTS_PER_SOL)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Airdrop(_)));
    }

    #[tokio::test]
    async fn test_unknown_signature_times_out() {
        let conn = SimulatedConnection::new();
        let err = conn
            .confirm_transaction(&Signature::default(), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConfirmationTimeout { .. }));
    }

    #[test]
    fn test_counter_sequence() {
        let program = SimulatedTransport::new(PROGRAM_ID);
        assert!(program.execute(Method::Increment).is_err());
        assert_eq!(program.count(), None);

        let created = program.execute(Method::Create).unwrap();
        assert_eq!(created.as_count_change().unwrap().label, "create");

        let first = program.execute(Method::Increment).unwrap();
        let second = program.execute(Method::Increment).unwrap();
        assert_eq!(first.as_count_change().unwrap().data, 0);
        assert_eq!(second.as_count_change().unwrap().data, 1);
        assert_eq!(program.count(), Some(2));
    }

    #[test]
    fn test_logs_decode_back() {
        let program = SimulatedTransport::new(PROGRAM_ID);
        let event = program.execute(Method::Create).unwrap();
        let logs = program.call_logs(Method::Create, Some(&event)).unwrap();
        assert_eq!(logs[1], "Program log: Instruction: Create");
        assert_eq!(extract_events(&PROGRAM_ID, &logs), vec![event]);
    }

    #[tokio::test]
    async fn test_signatures_distinct() {
        let program = SimulatedTransport::new(PROGRAM_ID);
        let sink = LogSink::new(PROGRAM_ID, Arc::new(ListenerRegistry::new()));
        let a = program.invoke(Method::Create, &sink).await.unwrap();
        let b = program.invoke(Method::Increment, &sink).await.unwrap();
        assert!(a.signature.starts_with("sim:"));
        assert_ne!(a.signature, b.signature);
        assert!(a.confirmed && b.confirmed);
    }

    #[tokio::test]
    async fn test_failed_call_is_recorded() {
        let program = SimulatedTransport::new(PROGRAM_ID);
        let sink = LogSink::new(PROGRAM_ID, Arc::new(ListenerRegistry::new()));
        assert!(matches!(
            program.invoke(Method::Increment, &sink).await,
            Err(ClientError::TransactionRejected(_))
        ));
        let ok = program.invoke(Method::Create, &sink).await.unwrap();
        assert_eq!(program.transaction_count(), 2);

        let sigs = program
            .signatures_for_address(&PROGRAM_ID, None, None, 10)
            .await
            .unwrap();
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[0].signature, ok.signature);
        assert!(!sigs[0].failed);
        assert!(sigs[1].failed);
        assert!(sigs[0].slot > sigs[1].slot);

        // failed transactions expose no logs
        assert!(LogSource::transaction_logs(&program, &sigs[1].signature)
            .await
            .unwrap()
            .is_none());
        let logs = LogSource::transaction_logs(&program, &ok.signature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extract_events(&PROGRAM_ID, &logs).len(), 1);
    }

    #[tokio::test]
    async fn test_history_scoped_to_program() {
        let program = SimulatedTransport::new(PROGRAM_ID);
        let sink = LogSink::new(PROGRAM_ID, Arc::new(ListenerRegistry::new()));
        program.invoke(Method::Create, &sink).await.unwrap();
        let other = program
            .signatures_for_address(&Pubkey::new_unique(), None, None, 10)
            .await
            .unwrap();
        assert!(other.is_empty());
        assert!(LogSource::transaction_logs(&program, "sim:missing").await.is_err());
    }

    #[test]
    fn test_failed_logs_shape() {
        let program = SimulatedTransport::new(PROGRAM_ID);
        let logs = program.call_logs(Method::Increment, None).unwrap();
        assert!(logs.last().unwrap().contains("failed"));
        assert!(extract_events(&PROGRAM_ID, &logs).is_empty());
    }
}
