//! Polling loop: scan → evaluate → reap → process

use anyhow::{Context, Result};
use hdm_broker::EnvelopeSource;
use hdm_core::HdmResult;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::detector::{CompletionDetector, FileEventSource};
use crate::orchestrator::Orchestrator;
use crate::upload::Uploader;

/// What happened during one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub handled: usize,
    pub failed: usize,
    pub reaped: usize,
}

/// Run one poll cycle at `now`.
///
/// Only a failure to read the watch location is returned; per-file errors
/// are logged and counted.
pub async fn tick<E, S, U>(
    source: &E,
    detector: &mut CompletionDetector,
    orchestrator: &Orchestrator<S, U>,
    now: SystemTime,
) -> HdmResult<TickReport>
where
    E: FileEventSource,
    S: EnvelopeSource,
    U: Uploader,
{
    let observations = source.poll()?;
    debug!(caller = "poll_changes", files = observations.len(), "checking for new files");

    let outcome = detector.evaluate(&observations, now);
    let mut report = TickReport::default();
    let tenant = orchestrator.settings().tenant.as_str();

    for expired in &outcome.expired {
        info!(caller = "poll_changes", path = %expired.path.display(), "deleting stale file");
        if !expired.failure_counted {
            orchestrator.metrics().record_failed(tenant);
        }
        match std::fs::remove_file(&expired.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // stays tracked; retried next tick
                warn!(caller = "poll_changes", path = %expired.path.display(), "delete failed: {e}");
                continue;
            }
        }
        detector.mark_reaped(&expired.path);
        report.reaped += 1;
    }

    for path in &outcome.ready {
        match orchestrator.handle(path).await {
            Ok(()) => {
                detector.mark_processed(path);
                report.handled += 1;
            }
            Err(_) => {
                // already logged and counted by the orchestrator
                detector.mark_failed(path);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Poll every `interval` until `shutdown` resolves or the watch location
/// becomes unreadable.
pub async fn run<E, S, U, F>(
    source: E,
    mut detector: CompletionDetector,
    orchestrator: Orchestrator<S, U>,
    interval: Duration,
    shutdown: F,
) -> Result<()>
where
    E: FileEventSource,
    S: EnvelopeSource,
    U: Uploader,
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(interval_secs = interval.as_secs(), "polling for heap dumps");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let report = tick(&source, &mut detector, &orchestrator, SystemTime::now())
            .await
            .context("polling watch directory")?;
        if report != TickReport::default() {
            info!(
                handled = report.handled,
                failed = report.failed,
                reaped = report.reaped,
                "poll cycle finished"
            );
        }
    }
}
