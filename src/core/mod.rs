//! Core functionality for the suspicious input guard.
//! This module contains the redacting flattener, the injection
//! signature matcher and the persistent per-IP throttle store.

mod clock;
mod persistence;
mod redactor;
mod signatures;
mod throttle_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use persistence::{load_state, temp_path, write_state_atomic};
pub use redactor::{flatten_all, flatten_redacted, SensitiveKeys, DEFAULT_SENSITIVE_KEYS, MAX_DEPTH};
pub use signatures::{
    default_rules, truncate_sample, SignatureHit, SignatureMatcher, SignatureRule,
    DEFAULT_SAMPLE_MAX_LEN, TRUNCATION_MARKER,
};
pub use throttle_store::{ThrottleDecision, ThrottleReason, ThrottleState, ThrottleStore};
