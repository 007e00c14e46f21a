//! Security events and the sink they are handed to.

use serde::{Deserialize, Serialize};

use crate::core::SignatureHit;
use crate::utils::{GuardError, GuardResult};

/// Event name carried by every emitted security event
pub const SUSPICIOUS_INPUT_EVENT: &str = "security.suspicious_input";

/// Human-readable message accompanying each event
pub const SUSPICIOUS_INPUT_MESSAGE: &str = "Suspicious input detected";

/// A detected suspicious request, built per request and never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub event: String,
    pub path: String,
    pub method: String,
    pub ip: String,
    pub user_agent: Option<String>,
    pub hits: Vec<SignatureHit>,
}

impl SecurityEvent {
    pub fn new(
        path: impl Into<String>,
        method: impl Into<String>,
        ip: impl Into<String>,
        user_agent: Option<String>,
        hits: Vec<SignatureHit>,
    ) -> Self {
        Self {
            event: SUSPICIOUS_INPUT_EVENT.to_string(),
            path: path.into(),
            method: method.into(),
            ip: ip.into(),
            user_agent,
            hits,
        }
    }
}

/// Destination for security events (audit log, SIEM forwarder, ...)
///
/// Calls are synchronous; an `Err` is counted and otherwise ignored by the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &SecurityEvent, message: &str) -> GuardResult<()>;
}

/// Writes events as warn-level `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &SecurityEvent, message: &str) -> GuardResult<()> {
        let hits = serde_json::to_string(&event.hits)
            .map_err(|e| GuardError::Sink(format!("unserializable hits: {}", e)))?;
        tracing::warn!(
            event = %event.event,
            path = %event.path,
            method = %event.method,
            ip = %event.ip,
            user_agent = ?event.user_agent,
            hits = %hits,
            "{}",
            message
        );
        Ok(())
    }
}
