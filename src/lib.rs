//! Suspicious input guard.
//!
//! Flattens request data while redacting sensitive fields, matches the
//! remaining strings against injection signatures, and emits a security
//! event only while the source stays within its per-IP logging budget.
//! Throttle state is persisted to a crash-safe JSON file.

pub mod config;
pub mod core;
pub mod events;
pub mod service;
pub mod utils;

pub use crate::config::Settings;
pub use crate::events::{EventSink, SecurityEvent, TracingSink};
pub use crate::service::{Diagnostics, InputGuardService, InspectionOutcome, RequestInput};
pub use crate::utils::{GuardError, GuardResult};
