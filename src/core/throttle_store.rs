use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::clock::{Clock, SystemClock};
use super::persistence::{load_state, write_state_atomic};
use crate::config::{FlushMode, ThrottleConfig};
use crate::utils::{log_store_event, log_throttle_decision, GuardError, GuardResult};

/// Persisted throttle state for one source identifier
///
/// All timestamps are epoch milliseconds; `blocked_until == 0` means not blocked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThrottleState {
    pub ip: String,
    pub window_start: u64,
    pub count: u32,
    pub total_count: u64,
    pub blocked_until: u64,
    pub last_seen: u64,
}

impl ThrottleState {
    fn new(ip: &str, now: u64) -> Self {
        Self {
            ip: ip.to_string(),
            window_start: now,
            last_seen: now,
            ..Self::default()
        }
    }

    pub fn is_blocked_at(&self, now: u64) -> bool {
        self.blocked_until != 0 && now < self.blocked_until
    }

    /// Timestamp used for retention; older files may lack `lastSeen`
    fn last_activity(&self) -> u64 {
        if self.last_seen != 0 {
            self.last_seen
        } else {
            self.window_start
        }
    }
}

/// Why a hit was allowed or denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleReason {
    Ok,
    RateLimited,
    Blocked,
}

impl ThrottleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleReason::Ok => "ok",
            ThrottleReason::RateLimited => "rate_limited",
            ThrottleReason::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of recording a hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleDecision {
    pub allowed: bool,
    pub reason: ThrottleReason,
    /// State after the hit was applied
    pub state: ThrottleState,
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<String, ThrottleState>,
    loaded: bool,
    dirty: bool,
}

struct Shared {
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<StoreState>,
    /// Set while a debounced flush task is pending
    flush_scheduled: AtomicBool,
    /// Serializes writers of the state file; held until a write really ends
    write_lock: Arc<Mutex<()>>,
}

/// Per-identifier fixed-window limiter with a cooldown block, persisted to a
/// JSON file
///
/// Lifecycle: construct, lazy load on first access, mutate, debounced flush,
/// and a final flush through [`ThrottleStore::close`]. Cloning yields another
/// handle to the same store.
#[derive(Clone)]
pub struct ThrottleStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ThrottleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleStore")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl ThrottleStore {
    /// Create a store using the system clock. Nothing is read from disk yet.
    pub fn new(config: ThrottleConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ThrottleConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                clock,
                state: Mutex::new(StoreState::default()),
                flush_scheduled: AtomicBool::new(false),
                write_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.shared.config
    }

    pub fn path(&self) -> &Path {
        &self.shared.config.storage_path
    }

    /// Record a suspicious hit from `ip` and decide whether it may be logged
    pub async fn hit(&self, ip: &str) -> GuardResult<ThrottleDecision> {
        let ip = ip.trim();
        if ip.is_empty() {
            return Err(GuardError::InvalidIdentifier(ip.to_string()));
        }

        let decision = {
            let mut guard = self.shared.state.lock().await;
            // A flush is scheduled below anyway
            self.ensure_loaded(&mut guard).await?;

            let now = self.shared.clock.now_ms();
            let cfg = &self.shared.config;
            let state = guard
                .entries
                .entry(ip.to_string())
                .or_insert_with(|| ThrottleState::new(ip, now));
            state.last_seen = now;

            let reason = if state.is_blocked_at(now) {
                // Totals keep accruing while blocked
                state.total_count += 1;
                ThrottleReason::Blocked
            } else {
                if state.blocked_until != 0 {
                    // Block expired: this hit opens a fresh window
                    state.blocked_until = 0;
                    state.window_start = now;
                    state.count = 0;
                } else if now.saturating_sub(state.window_start) >= cfg.window_ms {
                    state.window_start = now;
                    state.count = 0;
                }

                state.count += 1;
                state.total_count += 1;

                if state.count > cfg.limit {
                    state.blocked_until = now.saturating_add(cfg.block_ms);
                    ThrottleReason::RateLimited
                } else {
                    ThrottleReason::Ok
                }
            };

            let decision = ThrottleDecision {
                allowed: reason == ThrottleReason::Ok,
                reason,
                state: state.clone(),
            };
            guard.dirty = true;
            decision
        };

        log_throttle_decision(ip, decision.reason, decision.state.total_count);
        self.schedule_flush().await;
        Ok(decision)
    }

    /// Current state for `ip`, if tracked
    pub async fn get(&self, ip: &str) -> GuardResult<Option<ThrottleState>> {
        let ip = ip.trim();
        self.read(|entries| entries.get(ip).cloned()).await
    }

    /// Copy of every tracked identifier's state
    pub async fn snapshot(&self) -> GuardResult<HashMap<String, ThrottleState>> {
        self.read(|entries| entries.clone()).await
    }

    pub async fn len(&self) -> GuardResult<usize> {
        self.read(|entries| entries.len()).await
    }

    pub async fn is_empty(&self) -> GuardResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Whether in-memory state has changes not yet written to disk
    pub async fn is_dirty(&self) -> bool {
        self.shared.state.lock().await.dirty
    }

    /// Drop identifiers idle longer than the retention horizon; returns how many
    pub async fn prune(&self) -> GuardResult<usize> {
        let removed = {
            let mut guard = self.shared.state.lock().await;
            let mut removed = self.ensure_loaded(&mut guard).await?;
            removed += self.prune_locked(&mut guard);
            guard.dirty = true;
            removed
        };
        self.schedule_flush().await;
        Ok(removed)
    }

    /// Write the state file now if anything changed; returns whether a write happened
    ///
    /// On failure the in-memory state stays authoritative and remains dirty.
    pub async fn flush(&self) -> GuardResult<bool> {
        let writer = Arc::clone(&self.shared.write_lock).lock_owned().await;

        let snapshot = {
            let mut guard = self.shared.state.lock().await;
            if !guard.dirty {
                return Ok(false);
            }
            guard.dirty = false;
            guard.entries.clone()
        };

        let path = self.shared.config.storage_path.clone();
        let timeout = self.shared.config.flush_timeout();
        let entries = snapshot.len();
        let mut write = tokio::task::spawn_blocking(move || write_state_atomic(&path, &snapshot));

        let result = match tokio::time::timeout(timeout, &mut write).await {
            Ok(Ok(Ok(()))) => Ok(true),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(e)) => Err(GuardError::from(e)),
            Err(_) => {
                // The blocking write cannot be cancelled; keep other writers
                // off the temp file until it finishes.
                tokio::spawn(async move {
                    let _ = write.await;
                    drop(writer);
                });
                Err(GuardError::FlushTimeout(timeout))
            }
        };

        match &result {
            Ok(_) => log_store_event(
                "flush",
                true,
                Some(&format!("{} entries written to {}", entries, self.path().display())),
            ),
            Err(e) => {
                self.shared.state.lock().await.dirty = true;
                metrics::increment_counter!("guard_flush_failures_total");
                log_store_event("flush", false, Some(&e.to_string()));
            }
        }
        result
    }

    /// Final flush; call before shutting down
    pub async fn close(&self) -> GuardResult<()> {
        self.flush().await.map(|_| ())
    }

    /// Spawn a task pruning every `prune_interval_ms`; `None` when disabled
    pub fn spawn_pruner(&self) -> Option<JoinHandle<()>> {
        let every = self.shared.config.prune_interval()?;
        let store = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.prune().await {
                    Ok(removed) => log_store_event(
                        "prune",
                        true,
                        Some(&format!("{} idle identifiers removed", removed)),
                    ),
                    Err(e) => log_store_event("prune", false, Some(&e.to_string())),
                }
            }
        }))
    }

    /// Run `f` over the loaded entries, scheduling a flush if loading pruned any
    async fn read<T>(&self, f: impl FnOnce(&HashMap<String, ThrottleState>) -> T) -> GuardResult<T> {
        let (value, pruned) = {
            let mut guard = self.shared.state.lock().await;
            let pruned = self.ensure_loaded(&mut guard).await?;
            (f(&guard.entries), pruned)
        };
        if pruned > 0 {
            self.schedule_flush().await;
        }
        Ok(value)
    }

    /// Load the state file on first access; returns how many stale entries were pruned
    async fn ensure_loaded(&self, guard: &mut StoreState) -> GuardResult<usize> {
        if guard.loaded {
            return Ok(0);
        }

        let path = self.shared.config.storage_path.clone();
        let loaded = tokio::task::spawn_blocking(move || load_state(&path)).await?;
        log_store_event(
            "load",
            true,
            Some(&format!("{} entries from {}", loaded.len(), self.path().display())),
        );

        guard.entries = loaded;
        guard.loaded = true;
        let pruned = self.prune_locked(guard);
        guard.dirty = true;
        Ok(pruned)
    }

    fn prune_locked(&self, guard: &mut StoreState) -> usize {
        let now = self.shared.clock.now_ms();
        let cutoff = now.saturating_sub(self.shared.config.retention_ms);
        let before = guard.entries.len();
        guard.entries.retain(|_, s| s.last_activity() >= cutoff);
        before - guard.entries.len()
    }

    async fn schedule_flush(&self) {
        match self.shared.config.flush_mode {
            FlushMode::Immediate => {
                // Errors are already logged and counted by `flush`
                let _ = self.flush().await;
            }
            FlushMode::Debounced => {
                if self.shared.flush_scheduled.swap(true, Ordering::SeqCst) {
                    return;
                }
                let store = self.clone();
                let delay = self.shared.config.flush_debounce();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    store.shared.flush_scheduled.store(false, Ordering::SeqCst);
                    let _ = store.flush().await;
                });
            }
        }
    }
}
