//! Completion detection for heap dumps written into the watch directory
//!
//! The JVM writes a dump in one long append. A dump is considered finished
//! once its size stops changing between two polls and its mtime has settled.
//! Each file is tracked independently, so concurrent dumps never interfere.
//!
//! Abandoned files (stale and never processed) are reaped after a grace
//! period so the shared volume cannot fill up.

use hdm_core::config::DetectionConfig;
use hdm_core::{HdmError, HdmResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// One regular file as seen by a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Source of directory snapshots.
///
/// An error is fatal for the caller: a watch location that cannot be read
/// means the sidecar is misconfigured.
pub trait FileEventSource {
    fn poll(&self) -> HdmResult<Vec<Observation>>;
}

/// Polls a directory with `read_dir`.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    dir: PathBuf,
}

impl DirectoryScanner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileEventSource for DirectoryScanner {
    fn poll(&self) -> HdmResult<Vec<Observation>> {
        let entries = std::fs::read_dir(&self.dir).map_err(HdmError::io(format!(
            "could not read files in dir {}",
            self.dir.display()
        )))?;

        let mut observations = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(caller = "poll", dir = %self.dir.display(), "skipping unreadable entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            // follows symlinks, so a dangling link is a stat failure
            let meta = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(caller = "poll", path = %path.display(), "stat failed: {e}");
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }
            let modified = match meta.modified() {
                Ok(t) => t,
                Err(e) => {
                    warn!(caller = "poll", path = %path.display(), "no mtime: {e}");
                    continue;
                }
            };
            observations.push(Observation {
                path,
                size: meta.len(),
                modified,
            });
        }
        // stable processing order
        observations.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(observations)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    /// Still being sampled
    Watching,
    /// Handed to the orchestrator, awaiting the result
    InFlight,
    /// Processing failed; left for the reaper
    Failed,
    /// Expired; kept until the file is actually gone
    Reaping,
}

/// Tracking record for one file at or above the size threshold.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    /// When the current `size` was first observed
    pub sampled_at: SystemTime,
    /// First poll at which the file met the stability rule
    pub stable_since: Option<SystemTime>,
    pub stale_since: Option<SystemTime>,
    pub state: CandidateState,
}

/// File whose grace period ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub path: PathBuf,
    /// The failure was already counted (processing failed, or an earlier
    /// delete of this file failed)
    pub failure_counted: bool,
}

/// Result of one evaluation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Files to hand to the orchestrator, each exactly once
    pub ready: Vec<PathBuf>,
    /// Files to delete; confirm each with [`CompletionDetector::mark_reaped`]
    pub expired: Vec<Expired>,
}

/// Per-path state machine deciding when a dump is complete.
///
/// Pure with respect to time: `now` is always passed in.
#[derive(Debug)]
pub struct CompletionDetector {
    config: DetectionConfig,
    candidates: HashMap<PathBuf, CandidateFile>,
}

fn age(now: SystemTime, then: SystemTime) -> Duration {
    // mtimes in the future count as fresh
    now.duration_since(then).unwrap_or(Duration::ZERO)
}

impl CompletionDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            candidates: HashMap::new(),
        }
    }

    pub fn get(&self, path: &Path) -> Option<&CandidateFile> {
        self.candidates.get(path)
    }

    pub fn tracked(&self) -> usize {
        self.candidates.len()
    }

    /// Fold one directory snapshot into the tracking map.
    pub fn evaluate(&mut self, observations: &[Observation], now: SystemTime) -> PollOutcome {
        let mut outcome = PollOutcome::default();

        // Files that vanished (or shrank below the threshold) are forgotten.
        let min_size = self.config.min_size_bytes;
        self.candidates.retain(|path, _| {
            observations
                .iter()
                .any(|o| &o.path == path && o.size >= min_size)
        });

        for obs in observations {
            if obs.size < min_size {
                debug!(
                    caller = "evaluate",
                    path = %obs.path.display(),
                    size = obs.size,
                    "too small for a heap dump"
                );
                continue;
            }

            let stale_now = age(now, obs.modified) > self.config.stale_after();

            let Some(candidate) = self.candidates.get_mut(&obs.path) else {
                debug!(caller = "evaluate", path = %obs.path.display(), size = obs.size, "tracking new file");
                let stale_since = stale_now.then_some(now);
                if stale_since.is_some() {
                    info!(caller = "evaluate", path = %obs.path.display(), "flagging stale file for deletion");
                }
                self.candidates.insert(
                    obs.path.clone(),
                    CandidateFile {
                        path: obs.path.clone(),
                        size: obs.size,
                        modified: obs.modified,
                        sampled_at: now,
                        stable_since: None,
                        stale_since,
                        state: CandidateState::Watching,
                    },
                );
                continue;
            };

            if candidate.state == CandidateState::Reaping {
                // an earlier delete failed; retry without counting again
                outcome.expired.push(Expired {
                    path: obs.path.clone(),
                    failure_counted: true,
                });
                continue;
            }

            if stale_now && candidate.stale_since.is_none() {
                info!(caller = "evaluate", path = %obs.path.display(), "flagging stale file for deletion");
                candidate.stale_since = Some(now);
            } else if !stale_now && candidate.stale_since.is_some() {
                info!(caller = "evaluate", path = %obs.path.display(), "file written again, clearing stale flag");
                candidate.stale_since = None;
            }

            if let Some(flagged) = candidate.stale_since {
                if candidate.state != CandidateState::InFlight
                    && age(now, flagged) >= self.config.reap_after()
                {
                    outcome.expired.push(Expired {
                        path: obs.path.clone(),
                        failure_counted: candidate.state == CandidateState::Failed,
                    });
                    candidate.state = CandidateState::Reaping;
                    continue;
                }
            }

            if candidate.size != obs.size {
                debug!(
                    caller = "evaluate",
                    path = %obs.path.display(),
                    from = candidate.size,
                    to = obs.size,
                    "write operation still in progress"
                );
                candidate.size = obs.size;
                candidate.sampled_at = now;
                candidate.modified = obs.modified;
                candidate.stable_since = None;
                continue;
            }
            candidate.modified = obs.modified;

            if candidate.state != CandidateState::Watching {
                continue;
            }

            let gap = age(now, candidate.sampled_at);
            let settled = age(now, obs.modified) > self.config.settle();
            if gap >= self.config.min_sample_gap() && settled {
                candidate.stable_since.get_or_insert(now);
                candidate.state = CandidateState::InFlight;
                info!(
                    caller = "evaluate",
                    path = %obs.path.display(),
                    size = obs.size,
                    "heap dump complete"
                );
                outcome.ready.push(obs.path.clone());
            }
        }

        outcome
    }

    /// The file was uploaded and deleted; stop tracking it.
    pub fn mark_processed(&mut self, path: &Path) {
        self.candidates.remove(path);
    }

    /// Processing failed; the file is never handed off again and waits for
    /// the reaper.
    pub fn mark_failed(&mut self, path: &Path) {
        if let Some(c) = self.candidates.get_mut(path) {
            c.state = CandidateState::Failed;
        }
    }

    /// An expired file is gone from disk; stop tracking it.
    pub fn mark_reaped(&mut self, path: &Path) {
        self.candidates.remove(path);
    }
}
