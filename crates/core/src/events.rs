//! Counter program events
//!
//! Anchor emits events as `Program data: <base64>` log lines whose payload is
//! the 8-byte `event:<Name>` discriminator followed by the borsh-encoded struct.
//! Listeners address events by their IDL name (`countChangeEvent`).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{event_discriminator, CoreError, Result};

/// IDL name of [`CountChangeEvent`].
pub const COUNT_CHANGE_EVENT: &str = "countChangeEvent";

const COUNT_CHANGE_EVENT_STRUCT: &str = "CountChangeEvent";

/// Emitted by `create` (label `"create"`) and `increment` (label `"inc"`).
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct CountChangeEvent {
    pub data: u64,
    pub label: String,
}

/// Every event the program defines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "name", content = "payload")]
#[serde(rename_all = "camelCase")]
pub enum ProgramEvent {
    CountChangeEvent(CountChangeEvent),
}

impl ProgramEvent {
    /// IDL names of all known events.
    pub fn known_names() -> &'static [&'static str] {
        &[COUNT_CHANGE_EVENT]
    }

    /// Whether `name` is an event the program can emit.
    pub fn is_known(name: &str) -> bool {
        Self::known_names().contains(&name)
    }

    /// IDL name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            ProgramEvent::CountChangeEvent(_) => COUNT_CHANGE_EVENT,
        }
    }

    pub fn as_count_change(&self) -> Option<&CountChangeEvent> {
        match self {
            ProgramEvent::CountChangeEvent(e) => Some(e),
        }
    }

    /// Decode discriminator-prefixed event bytes.
    ///
    /// Returns `Ok(None)` for a discriminator this crate does not know about.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() < 8 {
            return Err(CoreError::Decode(format!(
                "event payload too short: {} bytes",
                bytes.len()
            )));
        }
        let (disc, payload) = bytes.split_at(8);

        if disc == event_discriminator(COUNT_CHANGE_EVENT_STRUCT) {
            let event = CountChangeEvent::try_from_slice(payload)
                .map_err(|e| CoreError::Decode(format!("{}: {}", COUNT_CHANGE_EVENT, e)))?;
            return Ok(Some(ProgramEvent::CountChangeEvent(event)));
        }

        debug!("Skipping event with unknown discriminator {}", hex::encode(disc));
        Ok(None)
    }

    /// Decode the base64 body of a `Program data:` line.
    pub fn decode_base64(data: &str) -> Result<Option<Self>> {
        let bytes = BASE64
            .decode(data.trim())
            .map_err(|e| CoreError::Decode(format!("base64: {}", e)))?;
        Self::decode(&bytes)
    }

    /// Discriminator-prefixed borsh encoding, as emitted on chain.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let (struct_name, payload) = match self {
            ProgramEvent::CountChangeEvent(e) => (
                COUNT_CHANGE_EVENT_STRUCT,
                borsh::to_vec(e).map_err(|e| CoreError::Decode(e.to_string()))?,
            ),
        };
        let mut out = event_discriminator(struct_name).to_vec();
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// The `Program data:` log line that carries this event.
    pub fn to_log_line(&self) -> Result<String> {
        Ok(format!("Program data: {}", BASE64.encode(self.encode()?)))
    }
}

impl From<CountChangeEvent> for ProgramEvent {
    fn from(event: CountChangeEvent) -> Self {
        ProgramEvent::CountChangeEvent(event)
    }
}
