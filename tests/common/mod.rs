#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use suspicious_input_guard::config::{FlushMode, ThrottleConfig};
use suspicious_input_guard::core::{ManualClock, ThrottleStore};

/// Fixed start time so window arithmetic in assertions stays readable
pub const T0: u64 = 1_700_000_000_000;

/// Generate a random IP address for testing
pub fn random_ip() -> String {
    format!(
        "{}.{}.{}.{}",
        rand::random::<u8>(),
        rand::random::<u8>(),
        rand::random::<u8>(),
        rand::random::<u8>()
    )
}

/// Throttle config writing to `dir`, with synchronous flushes
pub fn immediate_config(dir: &Path) -> ThrottleConfig {
    ThrottleConfig {
        window_ms: 60_000,
        limit: 5,
        block_ms: 300_000,
        storage_path: dir.join("suspiciousIps.json"),
        flush_mode: FlushMode::Immediate,
        ..ThrottleConfig::default()
    }
}

pub fn manual_store(config: ThrottleConfig) -> (ThrottleStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    (ThrottleStore::with_clock(config, clock.clone()), clock)
}

/// Wait for a specified duration
pub async fn wait(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Sink that keeps every emitted event for later assertions
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<(suspicious_input_guard::SecurityEvent, String)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<suspicious_input_guard::SecurityEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(event, _)| event.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl suspicious_input_guard::EventSink for RecordingSink {
    fn emit(
        &self,
        event: &suspicious_input_guard::SecurityEvent,
        message: &str,
    ) -> suspicious_input_guard::GuardResult<()> {
        self.events
            .lock()
            .unwrap()
            .push((event.clone(), message.to_string()));
        Ok(())
    }
}
