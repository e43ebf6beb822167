//! Program handle
//!
//! A `Program` is the client-side view of the deployed counter program:
//! an event listener registry keyed by event name, and a transport that
//! turns method names into submitted transactions.
//!
//! Events reach the registry as raw transaction logs through a `LogSink`,
//! either from the websocket log subscriber or synchronously from the
//! simulated transport while a call is in flight.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use helloworld_core::{extract_events, ProgramEvent, METHOD_CREATE, METHOD_INCREMENT};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info};

use crate::{ClientError, Result};

// ── Methods ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Create,
    Increment,
}

impl Method {
    /// IDL method name.
    pub fn name(&self) -> &'static str {
        match self {
            Method::Create => METHOD_CREATE,
            Method::Increment => METHOD_INCREMENT,
        }
    }

    /// Name the program logs as `Instruction: <name>`.
    pub fn instruction_name(&self) -> &'static str {
        match self {
            Method::Create => "Create",
            Method::Increment => "Increment",
        }
    }
}

impl FromStr for Method {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            METHOD_CREATE => Ok(Method::Create),
            METHOD_INCREMENT => Ok(Method::Increment),
            other => Err(ClientError::UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Transaction results ─────────────────────────────────────────────────

/// Result of a submitted method call.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    /// Transaction signature (base58 on a real validator).
    pub signature: String,
    pub confirmed: bool,
}

impl fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{} confirmed:{}", self.signature, self.confirmed)
    }
}

// ── Listener registry ───────────────────────────────────────────────────

pub type EventCallback = Arc<dyn Fn(&ProgramEvent) + Send + Sync>;

/// Opaque id of one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

struct Listener {
    event_name: String,
    callback: EventCallback,
}

/// Active listener registrations. Ids are never reused.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<ListenerId, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, event_name: &str, callback: EventCallback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().insert(
            id,
            Listener {
                event_name: event_name.to_string(),
                callback,
            },
        );
        debug!("Registered {} for {}", id, event_name);
        id
    }

    /// Remove a registration. Returns `false` if `id` is not registered
    /// (already removed, or never issued by this registry).
    pub fn remove(&self, id: ListenerId) -> bool {
        let removed = self.listeners().remove(&id).is_some();
        if removed {
            debug!("Removed {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every callback registered for `event`'s name.
    /// Callbacks run after the registry lock is released, so they may
    /// add or remove listeners themselves. Returns how many ran.
    pub fn dispatch(&self, event: &ProgramEvent) -> usize {
        let callbacks: Vec<EventCallback> = self
            .listeners()
            .values()
            .filter(|l| l.event_name == event.name())
            .map(|l| l.callback.clone())
            .collect();
        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Entry point for raw transaction logs of one program.
#[derive(Debug, Clone)]
pub struct LogSink {
    program_id: Pubkey,
    registry: Arc<ListenerRegistry>,
}

impl LogSink {
    pub fn new(program_id: Pubkey, registry: Arc<ListenerRegistry>) -> Self {
        Self {
            program_id,
            registry,
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Decode the program's events from one transaction's logs and fan them
    /// out. Returns the number of callbacks run.
    pub fn deliver(&self, logs: &[String]) -> usize {
        extract_events(&self.program_id, logs)
            .iter()
            .map(|event| {
                let fired = self.registry.dispatch(event);
                debug!("{} delivered to {} listener(s)", event.name(), fired);
                fired
            })
            .sum()
    }
}

// ── Transport trait ─────────────────────────────────────────────────────

/// Submits method calls for a program.
///
/// Implementations that observe the program's logs directly (the simulator,
/// or RPC submission with log polling) push them into `sink` before
/// returning; otherwise event delivery is left to the log subscriber.
#[async_trait::async_trait]
pub trait ProgramTransport: Send + Sync {
    async fn invoke(&self, method: Method, sink: &LogSink) -> Result<TransactionResult>;

    fn is_simulated(&self) -> bool;
}

#[async_trait::async_trait]
impl<T: ProgramTransport + ?Sized> ProgramTransport for Arc<T> {
    async fn invoke(&self, method: Method, sink: &LogSink) -> Result<TransactionResult> {
        (**self).invoke(method, sink).await
    }

    fn is_simulated(&self) -> bool {
        (**self).is_simulated()
    }
}

// ── Program ─────────────────────────────────────────────────────────────

pub struct Program {
    sink: LogSink,
    registry: Arc<ListenerRegistry>,
    transport: Box<dyn ProgramTransport>,
}

impl Program {
    pub fn new(program_id: Pubkey, transport: Box<dyn ProgramTransport>) -> Self {
        let registry = Arc::new(ListenerRegistry::new());
        info!(
            "Program handle for {} ({})",
            program_id,
            if transport.is_simulated() { "simulated" } else { "rpc" }
        );
        Self {
            sink: LogSink::new(program_id, registry.clone()),
            registry,
            transport,
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        self.sink.program_id()
    }

    pub fn is_simulated(&self) -> bool {
        self.transport.is_simulated()
    }

    /// Register `callback` for events named `event_name` (IDL name).
    pub fn add_event_listener<F>(&self, event_name: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&ProgramEvent) + Send + Sync + 'static,
    {
        if !ProgramEvent::is_known(event_name) {
            return Err(ClientError::UnknownEvent(event_name.to_string()));
        }
        Ok(self.registry.add(event_name, Arc::new(callback)))
    }

    /// Remove a listener. Removing the same id twice is a no-op that
    /// returns `false`.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> Arc<ListenerRegistry> {
        self.registry.clone()
    }

    /// Sink for this program's transaction logs (used by the log subscriber).
    pub fn log_sink(&self) -> LogSink {
        self.sink.clone()
    }

    /// Invoke the method called `method_name`.
    pub async fn invoke(&self, method_name: &str) -> Result<TransactionResult> {
        let method: Method = method_name.parse()?;
        debug!("Invoking {} on {}", method, self.program_id());
        self.transport.invoke(method, &self.sink).await
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("program_id", self.program_id())
            .field("listeners", &self.listener_count())
            .field("simulated", &self.is_simulated())
            .finish()
    }
}
