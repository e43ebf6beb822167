//! Event-correlated calls
//!
//! `await_event_for_call` invokes a program method and resolves with the
//! first event of a given name that arrives after the listener was wired:
//!
//! 1. register the listener (before the call is issued, so an event emitted
//!    while the call is in flight cannot be missed)
//! 2. submit the call and await its confirmation
//! 3. wait for the event, bounded by a timeout
//! 4. deregister exactly once, whichever way the wait ended
//!
//! The listener resolves a one-shot slot, so later events for the same
//! registration are ignored.
//!
//! Concurrent calls waiting on *different* event names are independent.
//! Concurrent calls waiting on the *same* name each get their own
//! registration and only ever remove their own, but every such registration
//! sees every matching event: correlation is by name and ordering only.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use helloworld_core::{CountChangeEvent, ProgramEvent, COUNT_CHANGE_EVENT};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::program::{ListenerId, ListenerRegistry, Program};
use crate::{ClientError, Result};

/// A listener registration that is removed when released or dropped.
#[must_use = "dropping a Registration removes the listener"]
pub struct Registration {
    registry: Arc<ListenerRegistry>,
    id: Option<ListenerId>,
}

impl Registration {
    /// Register `callback` on `program` for `event_name`.
    pub fn new<F>(program: &Program, event_name: &str, callback: F) -> Result<Self>
    where
        F: Fn(&ProgramEvent) + Send + Sync + 'static,
    {
        let id = program.add_event_listener(event_name, callback)?;
        Ok(Self {
            registry: program.registry(),
            id: Some(id),
        })
    }

    /// `None` once released.
    pub fn id(&self) -> Option<ListenerId> {
        self.id
    }

    /// Remove the listener now. Returns whether this call removed it;
    /// releasing twice, or after someone else removed the id, returns `false`.
    pub fn release(&mut self) -> bool {
        match self.id.take() {
            Some(id) => self.registry.remove(id),
            None => false,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if self.registry.remove(id) {
                debug!("Removed {} on drop", id);
            }
        }
    }
}

/// Invoke `method_name` and return the first `event_name` event it produces.
///
/// Fails with `UnknownEvent` / `UnknownMethod` for names the program does not
/// define. A submission error is propagated unchanged unless the event has
/// already arrived, in which case the event wins. Returns
/// `EventTimeout` if no event arrives within `timeout`. The listener is gone
/// when this returns, on every path (including the future being dropped).
pub async fn await_event_for_call(
    program: &Program,
    event_name: &str,
    method_name: &str,
    timeout: Duration,
) -> Result<ProgramEvent> {
    let (tx, mut rx) = oneshot::channel();
    let slot = Mutex::new(Some(tx));

    let mut registration = Registration::new(program, event_name, move |event| {
        if let Some(tx) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = tx.send(event.clone());
        }
    })?;

    info!("calling rpc method {} (awaiting {})", method_name, event_name);
    let submitted = match program.invoke(method_name).await {
        Ok(submitted) => submitted,
        Err(e) => {
            // the event may already be here, e.g. the client gave up
            // confirming after the node had run the call
            if let Ok(event) = rx.try_recv() {
                warn!("{} reported {} but {} arrived", method_name, e, event_name);
                registration.release();
                return Ok(event);
            }
            return Err(e);
        }
    };
    debug!("{} submitted: {}", method_name, submitted);

    let outcome = tokio::time::timeout(timeout, rx).await;
    registration.release();

    match outcome {
        Ok(Ok(event)) => Ok(event),
        Ok(Err(_)) => Err(ClientError::EventDropped(event_name.to_string())),
        Err(_) => {
            warn!(
                "No {} after {} within {:?} (tx {})",
                event_name, method_name, timeout, submitted.signature
            );
            Err(ClientError::EventTimeout {
                event: event_name.to_string(),
                method: method_name.to_string(),
                timeout,
            })
        }
    }
}

/// Shared program handle plus a default event timeout.
#[derive(Debug, Clone)]
pub struct CallHarness {
    program: Arc<Program>,
    timeout: Duration,
}

impl CallHarness {
    pub fn new(program: Arc<Program>, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn call(&self, event_name: &str, method_name: &str) -> Result<ProgramEvent> {
        await_event_for_call(&self.program, event_name, method_name, self.timeout).await
    }

    /// `call` for the counter's `countChangeEvent`.
    pub async fn count_change(&self, method_name: &str) -> Result<CountChangeEvent> {
        match self.call(COUNT_CHANGE_EVENT, method_name).await? {
            ProgramEvent::CountChangeEvent(event) => Ok(event),
        }
    }
}
