//! Rolling p99 latency per deployment version.
//!
//! Signals a rollback condition when a version's p99 over the window exceeds
//! the threshold. It never performs the rollback.
//!
//! Recording is O(1) amortized so the actors that feed it never wait on a
//! sort. Percentiles are computed on the query path over at most
//! `max_samples` retained samples per version.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{TelemetryRecord, TelemetrySink};
use crate::events::model::DeploymentVersion;

/// Rollback policy.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Rolling window length.
    pub window: Duration,
    /// p99 bound; exceeding it signals rollback.
    pub p99_threshold: Duration,
    /// Samples required before a version can be judged.
    pub min_samples: usize,
    /// Most recent samples kept per version; older ones are dropped first.
    pub max_samples: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(24 * 60 * 60),
            p99_threshold: Duration::from_millis(500),
            min_samples: 20,
            max_samples: 1000,
        }
    }
}

#[derive(Default)]
struct MonitorState {
    samples: HashMap<DeploymentVersion, VecDeque<(Instant, u64)>>,
    breached: HashSet<DeploymentVersion>,
}

/// In-process rollback monitor fed by [`TelemetrySink::record`].
pub struct RollbackMonitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl RollbackMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Record a duration observed at `at`.
    pub fn observe_at(&self, version: &DeploymentVersion, duration_ms: u64, at: Instant) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let samples = state.samples.entry(version.clone()).or_default();
        samples.push_back((at, duration_ms));
        prune(samples, at, self.config.window);
        while samples.len() > self.config.max_samples.max(1) {
            samples.pop_front();
        }
    }

    /// Re-judge every version as of `now`, warning once when a version
    /// starts breaching. Returns the versions currently in breach.
    pub fn evaluate_at(&self, now: Instant) -> Vec<DeploymentVersion> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        let MonitorState { samples, breached } = &mut *state;

        let mut in_breach = Vec::new();
        for (version, samples) in samples.iter_mut() {
            prune(samples, now, self.config.window);
            if self.breach(samples) {
                if breached.insert(version.clone()) {
                    warn!(
                        deployment_version = %version,
                        p99_ms = percentile(samples, 0.99).unwrap_or_default(),
                        threshold_ms = self.config.p99_threshold.as_millis() as u64,
                        "p99 latency over threshold; rollback condition raised"
                    );
                }
                in_breach.push(version.clone());
            } else {
                breached.remove(version);
            }
        }
        in_breach.sort_by(|a, b| a.0.cmp(&b.0));
        in_breach
    }

    pub fn evaluate(&self) -> Vec<DeploymentVersion> {
        self.evaluate_at(Instant::now())
    }

    /// Rolling p99 in milliseconds as of `now`, or `None` with no samples.
    pub fn p99_at(&self, version: &DeploymentVersion, now: Instant) -> Option<u64> {
        let mut state = self.state.lock().ok()?;
        let samples = state.samples.get_mut(version)?;
        prune(samples, now, self.config.window);
        percentile(samples, 0.99)
    }

    pub fn p99(&self, version: &DeploymentVersion) -> Option<u64> {
        self.p99_at(version, Instant::now())
    }

    /// Whether `version` currently breaches the p99 threshold.
    pub fn should_rollback_at(&self, version: &DeploymentVersion, now: Instant) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        match state.samples.get_mut(version) {
            Some(samples) => {
                prune(samples, now, self.config.window);
                self.breach(samples)
            }
            None => false,
        }
    }

    pub fn should_rollback(&self, version: &DeploymentVersion) -> bool {
        self.should_rollback_at(version, Instant::now())
    }

    fn breach(&self, samples: &VecDeque<(Instant, u64)>) -> bool {
        if samples.len() < self.config.min_samples.max(1) {
            return false;
        }
        percentile(samples, 0.99)
            .is_some_and(|p| p > self.config.p99_threshold.as_millis() as u64)
    }
}

impl TelemetrySink for RollbackMonitor {
    fn record(&self, record: &TelemetryRecord) {
        self.observe_at(&record.deployment_version, record.duration_ms, Instant::now());
    }
}

/// Spawn a background task that re-evaluates the monitor every `interval`.
pub fn spawn_evaluation_task(monitor: Arc<RollbackMonitor>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let breached = monitor.evaluate();
            debug!(breached = breached.len(), "Rollback monitor evaluated");
        }
    })
}

fn prune(samples: &mut VecDeque<(Instant, u64)>, now: Instant, window: Duration) {
    while let Some((at, _)) = samples.front() {
        if now.saturating_duration_since(*at) > window {
            samples.pop_front();
        } else {
            break;
        }
    }
}

/// Nearest-rank percentile.
fn percentile(samples: &VecDeque<(Instant, u64)>, p: f64) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    let mut values: Vec<u64> = samples.iter().map(|(_, d)| *d).collect();
    values.sort_unstable();
    let rank = (p * values.len() as f64).ceil() as usize;
    values.get(rank.saturating_sub(1)).copied()
}
