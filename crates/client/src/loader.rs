//! Event loading by polling JSON-RPC.
//!
//! The websocket subscriber only sees transactions while it is connected.
//! `EventLoader` reads the program's history instead: it pages
//! `getSignaturesForAddress` between two cursors and feeds each successful
//! transaction's `getTransaction` log messages into a `LogSink`.
//!
//! - `head`: newest transaction delivered; `poll` moves it forward
//! - `tail`: oldest transaction delivered; `backfill` moves it backward

use std::str::FromStr;
use std::sync::Arc;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::UiTransactionEncoding;
use tracing::{debug, info, warn};

use crate::program::LogSink;
use crate::{ClientError, Result};

/// One row of `getSignaturesForAddress`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    pub signature: String,
    pub slot: u64,
    /// The transaction landed but its execution failed.
    pub failed: bool,
}

/// Position of the last transaction read in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub signature: String,
    pub slot: u64,
}

impl From<&SignatureEntry> for Cursor {
    fn from(entry: &SignatureEntry) -> Self {
        Self {
            signature: entry.signature.clone(),
            slot: entry.slot,
        }
    }
}

/// Read access to a program's transaction history.
#[async_trait::async_trait]
pub trait LogSource: Send + Sync {
    /// Signatures that mention `address`, newest first. Starts after
    /// `before` and stops at `until` (both exclusive), at most `limit` rows.
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<&str>,
        until: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureEntry>>;

    /// Log messages of a successful transaction. `None` if it failed or
    /// the node kept no logs for it.
    async fn transaction_logs(&self, signature: &str) -> Result<Option<Vec<String>>>;
}

/// Page an oldest-first history the way `getSignaturesForAddress` does.
pub(crate) fn page_newest_first<'a, I>(
    history: I,
    before: Option<&str>,
    until: Option<&str>,
    limit: usize,
) -> Vec<SignatureEntry>
where
    I: DoubleEndedIterator<Item = &'a SignatureEntry>,
{
    let mut started = before.is_none();
    let mut page = Vec::new();
    for entry in history.rev() {
        if !started {
            started = Some(entry.signature.as_str()) == before;
            continue;
        }
        if Some(entry.signature.as_str()) == until || page.len() == limit {
            break;
        }
        page.push(entry.clone());
    }
    page
}

// ── RPC source ──────────────────────────────────────────────────────────

/// `LogSource` over the nonblocking `RpcClient`.
#[derive(Clone)]
pub struct RpcLogSource {
    rpc: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl RpcLogSource {
    /// History queries reject `processed`; it is raised to `confirmed`.
    pub fn new(rpc: Arc<RpcClient>, commitment: CommitmentConfig) -> Self {
        let commitment = if commitment.is_at_least_confirmed() {
            commitment
        } else {
            CommitmentConfig::confirmed()
        };
        Self { rpc, commitment }
    }

    pub fn commitment(&self) -> CommitmentConfig {
        self.commitment
    }
}

fn parse_signature(s: &str) -> Result<Signature> {
    Signature::from_str(s).map_err(|e| ClientError::InvalidParam(format!("signature {}: {}", s, e)))
}

#[async_trait::async_trait]
impl LogSource for RpcLogSource {
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<&str>,
        until: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureEntry>> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before: before.map(parse_signature).transpose()?,
            until: until.map(parse_signature).transpose()?,
            limit: Some(limit),
            commitment: Some(self.commitment),
        };
        let rows = self
            .rpc
            .get_signatures_for_address_with_config(address, config)
            .await
            .map_err(|e| ClientError::Rpc(format!("signatures for {}: {}", address, e)))?;

        Ok(rows
            .into_iter()
            .map(|row| SignatureEntry {
                failed: row.err.is_some(),
                signature: row.signature,
                slot: row.slot,
            })
            .collect())
    }

    async fn transaction_logs(&self, signature: &str) -> Result<Option<Vec<String>>> {
        let sig = parse_signature(signature)?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        let tx = self
            .rpc
            .get_transaction_with_config(&sig, config)
            .await
            .map_err(|e| ClientError::Rpc(format!("get transaction {}: {}", signature, e)))?;

        let Some(meta) = tx.transaction.meta else {
            return Ok(None);
        };
        if meta.err.is_some() {
            debug!("{} failed on chain, ignoring its logs", signature);
            return Ok(None);
        }
        Ok(meta.log_messages.into())
    }
}

// ── Loader ──────────────────────────────────────────────────────────────

/// Counters for one `poll` or `backfill` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Transactions whose logs were delivered.
    pub transactions: usize,
    /// Failed transactions and transactions without logs.
    pub skipped: usize,
    /// Listener callbacks run.
    pub callbacks: usize,
}

pub struct EventLoader {
    source: Arc<dyn LogSource>,
    sink: LogSink,
    batch_size: usize,
    head: Option<Cursor>,
    tail: Option<Cursor>,
}

impl EventLoader {
    pub fn new(source: Arc<dyn LogSource>, sink: LogSink, batch_size: usize) -> Self {
        Self {
            source,
            sink,
            batch_size: batch_size.max(1),
            head: None,
            tail: None,
        }
    }

    /// Resume after `head` instead of reading the whole history.
    pub fn with_head(mut self, head: Cursor) -> Self {
        self.tail.get_or_insert_with(|| head.clone());
        self.head = Some(head);
        self
    }

    pub fn head(&self) -> Option<&Cursor> {
        self.head.as_ref()
    }

    pub fn tail(&self) -> Option<&Cursor> {
        self.tail.as_ref()
    }

    /// Skip existing history: park both cursors on the newest transaction
    /// without delivering it.
    pub async fn start_at_latest(&mut self) -> Result<()> {
        let newest = self
            .source
            .signatures_for_address(self.sink.program_id(), None, None, 1)
            .await?;
        if let Some(entry) = newest.first() {
            info!("Event loader starting after {} (slot {})", entry.signature, entry.slot);
            self.head = Some(entry.into());
            self.tail = Some(entry.into());
        }
        Ok(())
    }

    /// Deliver every transaction newer than `head`, oldest first.
    ///
    /// `head` advances after each transaction, so an error part way through
    /// resumes from the last delivered one on the next poll.
    pub async fn poll(&mut self) -> Result<LoadStats> {
        let until = self.head.as_ref().map(|c| c.signature.clone());
        let mut before: Option<String> = None;
        let mut fresh = Vec::new();
        loop {
            let page = self
                .source
                .signatures_for_address(
                    self.sink.program_id(),
                    before.as_deref(),
                    until.as_deref(),
                    self.batch_size,
                )
                .await?;
            let full = page.len() == self.batch_size;
            before = page.last().map(|e| e.signature.clone());
            fresh.extend(page);
            if !full {
                break;
            }
        }

        let mut stats = LoadStats::default();
        for entry in fresh.iter().rev() {
            self.load(entry, &mut stats).await?;
            self.head = Some(entry.into());
            self.tail.get_or_insert_with(|| entry.into());
        }
        if !fresh.is_empty() {
            debug!(
                "Polled {} new transaction(s) for {}: {:?}",
                fresh.len(),
                self.sink.program_id(),
                stats
            );
        }
        Ok(stats)
    }

    /// Deliver up to `max` transactions older than `tail`, newest first.
    pub async fn backfill(&mut self, max: usize) -> Result<LoadStats> {
        let mut stats = LoadStats::default();
        let mut remaining = max;
        while remaining > 0 {
            let before = self.tail.as_ref().map(|c| c.signature.clone());
            let page = self
                .source
                .signatures_for_address(
                    self.sink.program_id(),
                    before.as_deref(),
                    None,
                    self.batch_size.min(remaining),
                )
                .await?;
            if page.is_empty() {
                break;
            }
            for entry in &page {
                self.load(entry, &mut stats).await?;
                self.tail = Some(entry.into());
                self.head.get_or_insert_with(|| entry.into());
                remaining -= 1;
            }
        }
        Ok(stats)
    }

    async fn load(&self, entry: &SignatureEntry, stats: &mut LoadStats) -> Result<()> {
        if entry.failed {
            debug!("Skipping failed tx {}", entry.signature);
            stats.skipped += 1;
            return Ok(());
        }
        match self.source.transaction_logs(&entry.signature).await? {
            Some(logs) => {
                stats.transactions += 1;
                stats.callbacks += self.sink.deliver(&logs);
            }
            None => {
                warn!("No logs for tx {} (slot {})", entry.signature, entry.slot);
                stats.skipped += 1;
            }
        }
        Ok(())
    }
}
