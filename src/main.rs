use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use suspicious_input_guard::utils::init_logging;
use suspicious_input_guard::{InputGuardService, RequestInput, Settings};

/// Reads newline-delimited JSON requests from stdin and inspects each one
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();
    tracing::info!("Starting suspicious input guard...");

    // Load configuration
    let settings = Settings::load().context("failed to load configuration")?;
    tracing::info!(
        storage_path = %settings.throttle.storage_path.display(),
        window_ms = settings.throttle.window_ms,
        limit = settings.throttle.limit,
        block_ms = settings.throttle.block_ms,
        "Configuration loaded"
    );

    let guard = InputGuardService::from_settings(&settings);
    let pruner = guard.store().spawn_pruner();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RequestInput>(&line) {
            Ok(request) => {
                let outcome = guard.inspect(&request).await;
                tracing::debug!(?outcome, "request inspected");
            }
            Err(e) => tracing::warn!(error = %e, "skipping malformed request line"),
        }
    }

    if let Some(pruner) = pruner {
        pruner.abort();
    }
    guard.shutdown().await.context("final flush failed")?;

    let stats = guard.diagnostics();
    tracing::info!(
        inspections = stats.inspections,
        emitted = stats.emitted,
        suppressed = stats.suppressed,
        failures = stats.failures,
        "Suspicious input guard stopped"
    );
    Ok(())
}
