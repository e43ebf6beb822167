//! Transaction log parsing
//!
//! Supported line shapes:
//! - `Program <addr> invoke [<depth>]`
//! - `Program log: Instruction: <name>` / `Program log: <message>`
//! - `Program data: <base64>` (borsh event, see [`crate::events`])
//! - `Program <addr> consumed <n> of <m> compute units`
//! - `Program <addr> success` / `Program <addr> failed: <reason>`

use solana_sdk::pubkey::Pubkey;
use tracing::warn;

use crate::events::ProgramEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    ProgramInvoke,
    ProgramLog,
    ProgramLogInstruction,
    ProgramData,
    ProgramConsumed,
    ProgramResult,
}

/// One classified log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolLog {
    /// Program the line belongs to. Taken from the line itself for
    /// invoke/consumed/result lines, otherwise the `current` program.
    pub addr: String,
    pub data: String,
    pub log_type: LogType,
}

/// Classify a single log line. Returns `None` for shapes we don't track.
pub fn parse_log(log: &str, current: &str) -> Option<SolLog> {
    let in_current = |data: &str, log_type| SolLog {
        addr: current.to_string(),
        data: data.to_string(),
        log_type,
    };

    if let Some(msg) = log.strip_prefix("Program log: ") {
        return Some(match msg.strip_prefix("Instruction: ") {
            Some(name) => in_current(name, LogType::ProgramLogInstruction),
            None => in_current(msg, LogType::ProgramLog),
        });
    }
    if let Some(data) = log.strip_prefix("Program data: ") {
        return Some(in_current(data, LogType::ProgramData));
    }

    let rest = log.strip_prefix("Program ")?;
    let (addr, tail) = rest.split_once(' ')?;
    let own = |data: &str, log_type| SolLog {
        addr: addr.to_string(),
        data: data.to_string(),
        log_type,
    };

    if let Some(depth) = tail.strip_prefix("invoke [") {
        return Some(own(depth.trim_end_matches(']'), LogType::ProgramInvoke));
    }
    if let Some(units) = tail.strip_prefix("consumed ") {
        return Some(own(units, LogType::ProgramConsumed));
    }
    if tail == "success" || tail.starts_with("failed") {
        return Some(own(tail, LogType::ProgramResult));
    }
    None
}

/// Decode the events `program_id` emitted in one transaction's logs.
///
/// Only `Program data:` lines written while `program_id` is on top of the
/// invoke stack count; data from CPI callees is ignored. Malformed payloads are
/// logged and skipped.
pub fn extract_events(program_id: &Pubkey, logs: &[String]) -> Vec<ProgramEvent> {
    let target = program_id.to_string();
    let mut stack: Vec<String> = Vec::new();
    let mut events = Vec::new();

    for line in logs {
        let current = stack.last().map(String::as_str).unwrap_or("");
        let Some(parsed) = parse_log(line, current) else {
            continue;
        };
        match parsed.log_type {
            LogType::ProgramInvoke => stack.push(parsed.addr),
            LogType::ProgramResult => {
                stack.pop();
            }
            LogType::ProgramData if parsed.addr == target => {
                match ProgramEvent::decode_base64(&parsed.data) {
                    Ok(Some(event)) => events.push(event),
                    Ok(None) => {}
                    Err(e) => warn!("Undecodable program data from {}: {}", target, e),
                }
            }
            _ => {}
        }
    }
    events
}
