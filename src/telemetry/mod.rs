//! Per-event telemetry: one record per processed event.

pub mod monitor;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::events::model::{DeploymentVersion, StreamKey};

pub use monitor::{MonitorConfig, RollbackMonitor};

/// How one event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// All six steps succeeded.
    Delivered,
    /// Delivered, but unpinning the previous message failed.
    Degraded,
    /// Rejected by validation before reaching an actor.
    Rejected,
    SendFailed,
    PinFailed,
    PersistFailed,
    /// Processing stopped unexpectedly (task panic).
    Aborted,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Degraded => "degraded",
            Self::Rejected => "rejected",
            Self::SendFailed => "send_failed",
            Self::PinFailed => "pin_failed",
            Self::PersistFailed => "persist_failed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered | Self::Degraded)
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record consumed by the rollback monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryRecord {
    pub stream_key: StreamKey,
    pub deployment_version: DeploymentVersion,
    pub duration_ms: u64,
    pub outcome: EventOutcome,
}

/// Destination for telemetry records.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: &TelemetryRecord);
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, record: &TelemetryRecord) {
        tracing::info!(
            target: "relay::telemetry",
            stream_key = %record.stream_key,
            deployment_version = %record.deployment_version,
            duration_ms = record.duration_ms,
            outcome = record.outcome.as_str(),
            "event processed"
        );
    }
}

/// Forwards every record to each inner sink.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TelemetrySink for FanoutSink {
    fn record(&self, record: &TelemetryRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<TelemetryRecord>>);

    impl TelemetrySink for Collect {
        fn record(&self, record: &TelemetryRecord) {
            self.0.lock().unwrap().push(record.clone());
        }
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(Collect::default());
        let b = Arc::new(Collect::default());
        let fanout = FanoutSink::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(TracingSink));

        fanout.record(&TelemetryRecord {
            stream_key: StreamKey::new("mobile-app"),
            deployment_version: DeploymentVersion("v1".into()),
            duration_ms: 12,
            outcome: EventOutcome::Delivered,
        });

        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&EventOutcome::PersistFailed).unwrap();
        assert_eq!(json, "\"persist_failed\"");
        assert!(EventOutcome::Degraded.is_success());
        assert!(!EventOutcome::SendFailed.is_success());
    }
}
