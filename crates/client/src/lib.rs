//! Helloworld Client
//!
//! Talks to the `helloworld` counter program on a Solana validator:
//!
//! - `funding`: throwaway identity → balance → airdrop → confirmation
//! - `program`: program handle with event listener registry and method invocation
//! - `harness`: invoke a method and await exactly one correlated event
//! - `subscriber`: websocket log subscription feeding the program's listeners
//! - `loader`: the same feed from transaction history over JSON-RPC polling
//! - `simulator`: in-process ledger and counter program for offline runs and tests

pub mod config;
pub mod connection;
pub mod funding;
pub mod harness;
pub mod loader;
pub mod program;
pub mod simulator;
pub mod subscriber;
pub mod transport;

pub use config::{ClientConfig, EventSource};
pub use connection::{Connection, RpcConnection};
pub use funding::{FundingClient, FundingReport};
pub use harness::{await_event_for_call, CallHarness, Registration};
pub use loader::{Cursor, EventLoader, LoadStats, LogSource, RpcLogSource, SignatureEntry};
pub use program::{ListenerId, ListenerRegistry, LogSink, Method, Program, ProgramTransport, TransactionResult};
pub use simulator::{SimulatedConnection, SimulatedTransport};
pub use subscriber::LogSubscriber;
pub use transport::RpcTransport;

use std::time::Duration;

use helloworld_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("airdrop rejected: {0}")]
    Airdrop(String),
    #[error("confirmation of {signature} timed out after {timeout:?}")]
    ConfirmationTimeout { signature: String, timeout: Duration },
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("no {event} event within {timeout:?} of calling {method}")]
    EventTimeout {
        event: String,
        method: String,
        timeout: Duration,
    },
    #[error("listener for {0} was removed before an event arrived")]
    EventDropped(String),
    #[error("subscription error: {0}")]
    Subscription(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
