//! Utility modules for the suspicious input guard.
//! This module contains common utilities used across the crate.

mod error;
mod logging;

pub use logging::{create_request_span, init_logging, log_store_event, log_throttle_decision};

pub use error::{GuardError, GuardResult};
