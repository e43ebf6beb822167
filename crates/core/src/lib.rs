//! Helloworld Core
//!
//! Protocol primitives for the `helloworld` counter program:
//! program address, Anchor discriminators, event payloads and
//! transaction log decoding.

pub mod events;
pub mod logging;
pub mod logs;

use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

pub use events::{CountChangeEvent, ProgramEvent, COUNT_CHANGE_EVENT};
pub use logs::{extract_events, parse_log, LogType, SolLog};

/// Counter program address on localnet.
pub const PROGRAM_ID: Pubkey = solana_sdk::pubkey!("8weB5xqS5jbQzxmHEr2e79UUSYur6QpFwkMtdGezgtPy");

/// `create(authority)`: initialize a counter at zero.
pub const METHOD_CREATE: &str = "create";

/// `increment()`: bump the counter, authority must sign.
pub const METHOD_INCREMENT: &str = "increment";

/// Methods exposed by the program, in IDL order.
pub const METHODS: &[&str] = &[METHOD_CREATE, METHOD_INCREMENT];

/// Parse a base58 program address.
pub fn parse_program_id(s: &str) -> Result<Pubkey> {
    s.trim()
        .parse::<Pubkey>()
        .map_err(|e| CoreError::InvalidProgramId(format!("{}: {}", s, e)))
}

/// Anchor discriminator: `sha256("{namespace}:{name}")[..8]`.
pub fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let hash = Sha256::digest(format!("{}:{}", namespace, name).as_bytes());
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&hash[..8]);
    disc
}

/// Discriminator prefixed to instruction data for `method`.
pub fn instruction_discriminator(method: &str) -> [u8; 8] {
    discriminator("global", method)
}

/// Discriminator prefixed to `Program data:` payloads for the event struct `name`.
pub fn event_discriminator(name: &str) -> [u8; 8] {
    discriminator("event", name)
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid program ID: {0}")]
    InvalidProgramId(String),
    #[error("Decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
