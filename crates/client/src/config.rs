//! Client configuration
//!
//! Endpoint, commitment, program address and timing parameters.
//! Loaded from an optional JSON file with env var overrides on top.

use std::path::Path;
use std::time::Duration;

use helloworld_core::PROGRAM_ID;
use serde::Deserialize;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

use crate::{ClientError, Result};

pub const DEFAULT_RPC_URL: &str = "http://localhost:8899";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8900";
pub const DEFAULT_COMMITMENT: &str = "confirmed";

/// Airdrop requested by the funding script: 100 SOL.
pub const DEFAULT_AIRDROP_LAMPORTS: u64 = 100 * LAMPORTS_PER_SOL;

pub const RPC_URL_ENV: &str = "HELLOWORLD_RPC_URL";
pub const WS_URL_ENV: &str = "HELLOWORLD_WS_URL";
pub const COMMITMENT_ENV: &str = "HELLOWORLD_COMMITMENT";
pub const PROGRAM_ID_ENV: &str = "HELLOWORLD_PROGRAM_ID";

/// Where a call's events are read from on a real validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Websocket `logsSubscribe`.
    #[default]
    Subscription,
    /// `getTransaction` / `getSignaturesForAddress` over JSON-RPC.
    Poll,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // ── Endpoint ────────────────────────────────────────────
    /// JSON-RPC endpoint of the validator.
    pub rpc_url: String,
    /// Websocket endpoint used for log subscriptions.
    pub ws_url: String,
    /// Commitment level: "processed", "confirmed" or "finalized".
    pub commitment: String,

    // ── Program ─────────────────────────────────────────────
    /// Base58 address of the deployed counter program.
    pub program_id: String,

    // ── Funding ─────────────────────────────────────────────
    /// Lamports requested per airdrop (default: 100 SOL).
    pub airdrop_lamports: u64,
    /// How long to wait for an airdrop to confirm in seconds (default: 30).
    pub confirm_timeout_secs: u64,

    // ── Harness ─────────────────────────────────────────────
    /// How long a correlated call waits for its event in seconds (default: 30).
    pub event_timeout_secs: u64,
    pub event_source: EventSource,

    // ── Log polling ─────────────────────────────────────────
    /// Delay between `watch` polls in milliseconds (default: 1000).
    pub poll_interval_ms: u64,
    /// Signatures requested per `getSignaturesForAddress` page (default: 100).
    pub poll_batch_size: usize,

    /// Run against the in-process simulator instead of a validator.
    pub dry_run: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            commitment: DEFAULT_COMMITMENT.to_string(),
            program_id: PROGRAM_ID.to_string(),
            airdrop_lamports: DEFAULT_AIRDROP_LAMPORTS,
            confirm_timeout_secs: 30,
            event_timeout_secs: 30,
            event_source: EventSource::Subscription,
            poll_interval_ms: 1000,
            poll_batch_size: 100,
            dry_run: false,
        }
    }
}

impl ClientConfig {
    /// Defaults with env var overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Load config from a file, falling back to defaults.
    /// Missing fields are filled from defaults, unknown fields are ignored.
    /// A corrupt file is reported and ignored; it is never written to.
    pub fn load_from(path: &Path) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<ClientConfig>(&data) {
                Ok(c) => {
                    info!("Loaded client config from {:?}", path);
                    c
                }
                Err(e) => {
                    warn!("Corrupt config {:?}: {}, using defaults", path, e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {:?}, using defaults", path);
                Self::default()
            }
            Err(e) => {
                warn!("Failed to read config {:?}: {}, using defaults", path, e);
                Self::default()
            }
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 4] = [
            (RPC_URL_ENV, &mut self.rpc_url),
            (WS_URL_ENV, &mut self.ws_url),
            (COMMITMENT_ENV, &mut self.commitment),
            (PROGRAM_ID_ENV, &mut self.program_id),
        ];
        for (var, field) in overrides {
            if let Ok(val) = std::env::var(var) {
                if !val.is_empty() {
                    debug!("{}={}", var, val);
                    *field = val;
                }
            }
        }
    }

    pub fn commitment_config(&self) -> Result<CommitmentConfig> {
        parse_commitment(&self.commitment)
    }

    pub fn program_pubkey(&self) -> Result<Pubkey> {
        Ok(helloworld_core::parse_program_id(&self.program_id)?)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.event_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Parse a commitment level name.
pub fn parse_commitment(level: &str) -> Result<CommitmentConfig> {
    match level.trim().to_lowercase().as_str() {
        "processed" => Ok(CommitmentConfig::processed()),
        "confirmed" => Ok(CommitmentConfig::confirmed()),
        "finalized" => Ok(CommitmentConfig::finalized()),
        other => Err(ClientError::Config(format!("unknown commitment level: {}", other))),
    }
}
