use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{DetectionConfig, RedactionScope, Settings};
use crate::core::{
    flatten_all, flatten_redacted, SensitiveKeys, SignatureHit, SignatureMatcher, ThrottleReason,
    ThrottleStore,
};
use crate::events::{EventSink, SecurityEvent, TracingSink, SUSPICIOUS_INPUT_MESSAGE};
use crate::utils::{create_request_span, GuardError, GuardResult};

/// Everything the guard needs from one incoming request
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestInput {
    pub method: String,
    /// Request path as received, including the query string
    pub path: String,
    /// Source identifier used for throttling
    pub ip: String,
    pub user_agent: Option<String>,
    pub query: Value,
    pub params: Value,
    pub body: Value,
}

/// Internal step of the inspection pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Throttle,
    Emit,
    /// A panic escaped one of the stages
    Panic,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Throttle => "throttle",
            PipelineStage::Emit => "emit",
            PipelineStage::Panic => "panic",
        }
    }
}

/// What happened to one inspected request; never surfaced to the request's caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectionOutcome {
    /// No signature matched
    Clean,
    /// Hits were found and the event was handed to the sink
    Emitted { hits: Vec<SignatureHit> },
    /// Hits were found but the source is over its logging budget
    Suppressed { reason: ThrottleReason, hits: usize },
    /// A stage failed; the failure was swallowed
    Failed { stage: PipelineStage, error: String },
}

/// Counter snapshot, see [`InputGuardService::diagnostics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub inspections: u64,
    pub emitted: u64,
    pub suppressed: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    inspections: AtomicU64,
    emitted: AtomicU64,
    suppressed: AtomicU64,
    failures: AtomicU64,
}

struct StageFailure {
    stage: PipelineStage,
    error: GuardError,
}

/// Fail-open pipeline: redact and flatten, match, throttle per source, emit
pub struct InputGuardService {
    matcher: SignatureMatcher,
    store: ThrottleStore,
    sink: Arc<dyn EventSink>,
    sensitive: SensitiveKeys,
    redaction_scope: RedactionScope,
    counters: Counters,
}

impl InputGuardService {
    /// Creates a new guard around an injected store and sink
    ///
    /// # Arguments
    ///
    /// * `matcher` - Ordered signature rules
    /// * `store` - Per-IP throttle store; its lifecycle stays with the caller
    /// * `sink` - Destination for allowed events
    /// * `detection` - Redaction settings
    pub fn new(
        matcher: SignatureMatcher,
        store: ThrottleStore,
        sink: Arc<dyn EventSink>,
        detection: &DetectionConfig,
    ) -> Self {
        Self {
            matcher,
            store,
            sink,
            sensitive: SensitiveKeys::with_extra(&detection.extra_sensitive_keys),
            redaction_scope: detection.redaction_scope,
            counters: Counters::default(),
        }
    }

    /// Builds the guard from settings, logging events through `tracing`
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            SignatureMatcher::new(settings.detection.sample_max_len),
            ThrottleStore::new(settings.throttle.clone()),
            Arc::new(TracingSink),
            &settings.detection,
        )
    }

    pub fn store(&self) -> &ThrottleStore {
        &self.store
    }

    /// Inspects one request
    ///
    /// Never fails and never panics outward: every internal failure becomes
    /// [`InspectionOutcome::Failed`] and is otherwise ignored.
    pub async fn inspect(&self, request: &RequestInput) -> InspectionOutcome {
        self.counters.inspections.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("guard_inspections_total");

        let span = create_request_span(&Uuid::new_v4().to_string(), request.ip.trim());
        let outcome = match AssertUnwindSafe(self.run_pipeline(request))
            .catch_unwind()
            .instrument(span)
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(failure)) => InspectionOutcome::Failed {
                stage: failure.stage,
                error: failure.error.to_string(),
            },
            Err(_) => InspectionOutcome::Failed {
                stage: PipelineStage::Panic,
                error: "inspection panicked".to_string(),
            },
        };

        self.record(&outcome);
        outcome
    }

    /// Inspects `request` on a background task so the caller never waits
    pub fn spawn_inspect(self: &Arc<Self>, request: RequestInput) -> JoinHandle<InspectionOutcome> {
        let guard = Arc::clone(self);
        tokio::spawn(async move { guard.inspect(&request).await })
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            inspections: self.counters.inspections.load(Ordering::Relaxed),
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Final flush of the throttle store
    pub async fn shutdown(&self) -> GuardResult<()> {
        self.store.close().await
    }

    /// String leaves of the request that are eligible for inspection
    pub fn candidates(&self, request: &RequestInput) -> Vec<String> {
        let mut values = match self.redaction_scope {
            RedactionScope::All => {
                let mut values = flatten_redacted(&request.query, &self.sensitive);
                values.extend(flatten_redacted(&request.params, &self.sensitive));
                values
            }
            RedactionScope::BodyOnly => {
                let mut values = flatten_all(&request.query);
                values.extend(flatten_all(&request.params));
                values
            }
        };
        values.extend(flatten_redacted(&request.body, &self.sensitive));
        values
    }

    async fn run_pipeline(&self, request: &RequestInput) -> Result<InspectionOutcome, StageFailure> {
        let hits = self.matcher.scan_all(self.candidates(request));
        if hits.is_empty() {
            return Ok(InspectionOutcome::Clean);
        }

        // Throttle key and logged ip must agree
        let ip = request.ip.trim();
        let decision = self
            .store
            .hit(ip)
            .await
            .map_err(|error| StageFailure {
                stage: PipelineStage::Throttle,
                error,
            })?;
        if !decision.allowed {
            return Ok(InspectionOutcome::Suppressed {
                reason: decision.reason,
                hits: hits.len(),
            });
        }

        let event = SecurityEvent::new(
            request.path.clone(),
            request.method.clone(),
            ip,
            request.user_agent.clone(),
            hits,
        );
        self.sink
            .emit(&event, SUSPICIOUS_INPUT_MESSAGE)
            .map_err(|error| StageFailure {
                stage: PipelineStage::Emit,
                error,
            })?;

        Ok(InspectionOutcome::Emitted { hits: event.hits })
    }

    fn record(&self, outcome: &InspectionOutcome) {
        match outcome {
            InspectionOutcome::Clean => {}
            InspectionOutcome::Emitted { .. } => {
                self.counters.emitted.fetch_add(1, Ordering::Relaxed);
                metrics::increment_counter!("guard_events_emitted_total");
            }
            InspectionOutcome::Suppressed { reason, .. } => {
                self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                metrics::increment_counter!("guard_events_suppressed_total", "reason" => reason.as_str());
            }
            InspectionOutcome::Failed { stage, error } => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                metrics::increment_counter!("guard_pipeline_failures_total", "stage" => stage.as_str());
                tracing::debug!(stage = stage.as_str(), error = %error, "inspection failed open");
            }
        }
    }
}
