//! Change-triggered recomputation loop.
//!
//! One consumer reads change events strictly in arrival order. Every event
//! triggers a full re-scan of the watched root on the blocking pool; a
//! successful scan overwrites the size gauge and the event kind's last-update
//! timestamp. Scans never overlap and events are never coalesced, so a burst
//! of N events costs N back-to-back scans.
//!
//! Backend errors are logged and otherwise ignored. When the event stream
//! closes the loop returns `Ok` and the published size stays frozen.
//! Traversal failures are handled per [`ScanErrorPolicy`]; with the default
//! `Exit` policy the loop returns the error and the caller decides the
//! process's fate.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::metrics::MetricSink;
use crate::model::ChangeEvent;
use crate::source::ChangeStreams;
use crate::walker::{DirectorySizer, FileSystem, WalkError};

/// What the loop does when a scan fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanErrorPolicy {
    /// Stop the loop and return the error.
    #[default]
    Exit,
    /// Keep the previous published values and wait for the next event.
    Skip,
}

impl FromStr for ScanErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "exit" => Ok(ScanErrorPolicy::Exit),
            "skip" => Ok(ScanErrorPolicy::Skip),
            other => Err(format!(
                "invalid scan error policy '{}' (expected exit or skip)",
                other
            )),
        }
    }
}

impl fmt::Display for ScanErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanErrorPolicy::Exit => "exit",
            ScanErrorPolicy::Skip => "skip",
        })
    }
}

/// Error type for a loop that stopped before its event stream closed.
#[derive(Debug)]
pub enum UpdateError {
    /// A scan failed under [`ScanErrorPolicy::Exit`].
    Traversal(WalkError),
    /// The blocking scan task panicked or was cancelled.
    ScanAborted(String),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::Traversal(e) => write!(f, "directory scan failed: {}", e),
            UpdateError::ScanAborted(msg) => write!(f, "directory scan aborted: {}", msg),
        }
    }
}

impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UpdateError::Traversal(e) => Some(e),
            UpdateError::ScanAborted(_) => None,
        }
    }
}

impl From<WalkError> for UpdateError {
    fn from(e: WalkError) -> Self {
        UpdateError::Traversal(e)
    }
}

/// Counters for a loop that ended because its event stream closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Events whose scan completed and was published.
    pub scans: u64,
    /// Events whose scan failed under [`ScanErrorPolicy::Skip`].
    pub skipped: u64,
    /// Backend errors received.
    pub backend_errors: u64,
}

/// Scans `root` once and publishes the size, without touching last-update series.
///
/// Used at startup, before the watch is armed, so the first scrape already has data.
pub fn publish_initial_size<F: FileSystem, M: MetricSink + ?Sized>(
    sizer: &DirectorySizer<F>,
    metrics: &M,
    root: &Path,
) -> Result<u64, WalkError> {
    let t0 = Instant::now();
    let bytes = sizer.compute_size(root)?;
    metrics.set_total_bytes(bytes);
    info!(
        path = %root.display(),
        bytes,
        duration_ms = t0.elapsed().as_millis() as u64,
        "initial directory size set"
    );
    Ok(bytes)
}

fn record_backend_error(e: &notify::Error, summary: &mut LoopSummary) {
    summary.backend_errors += 1;
    warn!(error = %e, backend_errors = summary.backend_errors, "watcher error");
}

/// The single consumer of a [`ChangeStreams`] pair.
pub struct UpdateLoop<F: FileSystem, M: MetricSink> {
    sizer: Arc<DirectorySizer<F>>,
    metrics: Arc<M>,
    root: PathBuf,
    streams: ChangeStreams,
    on_scan_error: ScanErrorPolicy,
}

impl<F, M> UpdateLoop<F, M>
where
    F: FileSystem + 'static,
    M: MetricSink + 'static,
{
    pub fn new(
        sizer: Arc<DirectorySizer<F>>,
        metrics: Arc<M>,
        root: impl Into<PathBuf>,
        streams: ChangeStreams,
    ) -> Self {
        Self {
            sizer,
            metrics,
            root: root.into(),
            streams,
            on_scan_error: ScanErrorPolicy::default(),
        }
    }

    pub fn with_scan_error_policy(mut self, policy: ScanErrorPolicy) -> Self {
        self.on_scan_error = policy;
        self
    }

    /// Runs until the event stream closes (`Ok`) or a fatal scan error occurs (`Err`).
    pub async fn run(self) -> Result<LoopSummary, UpdateError> {
        let ChangeStreams { events, errors } = &self.streams;
        let mut errors_open = true;
        let mut summary = LoopSummary::default();

        loop {
            tokio::select! {
                received = events.recv() => {
                    let Ok(event) = received else { break };
                    self.handle_event(event, &mut summary).await?;
                }
                received = errors.recv(), if errors_open => match received {
                    Ok(e) => record_backend_error(&e, &mut summary),
                    Err(_) => errors_open = false,
                },
            }
        }

        // Errors still queued when the event stream closed.
        while let Ok(e) = errors.try_recv() {
            record_backend_error(&e, &mut summary);
        }

        warn!(
            path = %self.root.display(),
            scans = summary.scans,
            "event stream closed, directory size is no longer updated"
        );
        Ok(summary)
    }

    async fn handle_event(
        &self,
        event: ChangeEvent,
        summary: &mut LoopSummary,
    ) -> Result<(), UpdateError> {
        let sizer = Arc::clone(&self.sizer);
        let root = self.root.clone();
        let t0 = Instant::now();

        // The scan may block for a long time; keep it off the async workers.
        let result = tokio::task::spawn_blocking(move || sizer.compute_size(&root))
            .await
            .map_err(|e| UpdateError::ScanAborted(e.to_string()))?;
        let elapsed = t0.elapsed();

        match result {
            Ok(bytes) => {
                self.metrics.set_total_bytes(bytes);
                self.metrics.set_last_update(event.kind, event.observed_at);
                summary.scans += 1;
                debug!(
                    kind = %event.kind,
                    path = %event.path.display(),
                    bytes,
                    duration_ms = elapsed.as_millis() as u64,
                    "directory rescanned"
                );
                Ok(())
            }
            Err(e) => match self.on_scan_error {
                ScanErrorPolicy::Exit => {
                    error!(
                        error = %e,
                        kind = %event.kind,
                        duration_ms = elapsed.as_millis() as u64,
                        "directory scan failed"
                    );
                    Err(UpdateError::Traversal(e))
                }
                ScanErrorPolicy::Skip => {
                    summary.skipped += 1;
                    warn!(
                        error = %e,
                        kind = %event.kind,
                        skipped = summary.skipped,
                        "directory scan failed, keeping previous size"
                    );
                    Ok(())
                }
            },
        }
    }
}
